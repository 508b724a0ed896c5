use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{Event, EventStatus, ModerationSettings, Participant, Role};
use crate::db::{format_timestamp, now_timestamp, parse_timestamp, write_transaction};
use crate::error::{AppError, AppResult};

const EVENT_COLUMNS: &str = "e.id, e.name, e.description, e.date, e.end_date, e.cover_image, \
     e.organizer_id, e.photo_count, e.participant_count, e.require_approval, \
     e.allow_downloads, e.created_at";

/// Fields supplied by the organizer when creating an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub name: String,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub moderation: ModerationSettings,
}

/// Result of a join attempt.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub event: Event,
    pub role: Role,
    /// False when the user was already a member.
    pub newly_joined: bool,
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        date: parse_timestamp(&row.get::<_, String>(3)?),
        end_date: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_timestamp(&s)),
        cover_image: row.get(5)?,
        organizer_id: row.get(6)?,
        photo_count: row.get(7)?,
        participant_count: row.get(8)?,
        moderation: ModerationSettings {
            require_approval: row.get(9)?,
            allow_downloads: row.get(10)?,
        },
        created_at: parse_timestamp(&row.get::<_, String>(11)?),
    })
}

impl NewEvent {
    pub fn validate(&self) -> AppResult<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Event name is required".into()));
        }
        if name.chars().count() > 120 {
            return Err(AppError::BadRequest(
                "Event name must be 120 characters or less".into(),
            ));
        }
        if let Some(end) = self.end_date {
            if end < self.date {
                return Err(AppError::BadRequest(
                    "Event end date must not be before its start date".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Create an event; the creator becomes its organizer and first participant.
pub fn create_event(conn: &mut Connection, organizer_id: &str, new: &NewEvent) -> AppResult<Event> {
    new.validate()?;

    let id = uuid::Uuid::now_v7().to_string();
    let now = now_timestamp();
    let description = new
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let tx = write_transaction(conn)?;
    tx.execute(
        "INSERT INTO events (id, name, description, date, end_date, organizer_id,
                             photo_count, participant_count, require_approval,
                             allow_downloads, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 1, ?7, ?8, ?9)",
        params![
            id,
            new.name.trim(),
            description,
            format_timestamp(&new.date),
            new.end_date.as_ref().map(format_timestamp),
            organizer_id,
            new.moderation.require_approval,
            new.moderation.allow_downloads,
            now,
        ],
    )?;
    tx.execute(
        "INSERT INTO participants (event_id, user_id, role, photo_count, joined_at)
         VALUES (?1, ?2, 'organizer', 0, ?3)",
        params![id, organizer_id, now],
    )?;
    tx.commit()?;

    tracing::info!("Event {} created by {}", id, organizer_id);
    get_event(conn, &id)
}

pub fn get_event(conn: &Connection, id: &str) -> AppResult<Event> {
    conn.query_row(
        &format!("SELECT {} FROM events e WHERE e.id = ?1", EVENT_COLUMNS),
        params![id],
        row_to_event,
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

/// Events the user organizes or joined, newest first.
pub fn list_events_for_user(conn: &Connection, user_id: &str) -> AppResult<Vec<(Event, Role)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {}, p.role FROM events e
         JOIN participants p ON p.event_id = e.id
         WHERE p.user_id = ?1
         ORDER BY e.date DESC, e.id DESC",
        EVENT_COLUMNS
    ))?;

    let events = stmt
        .query_map(params![user_id], |row| {
            Ok((row_to_event(row)?, Role::parse(&row.get::<_, String>(12)?)))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn participant_role(conn: &Connection, event_id: &str, user_id: &str) -> AppResult<Option<Role>> {
    let role = conn
        .query_row(
            "SELECT role FROM participants WHERE event_id = ?1 AND user_id = ?2",
            params![event_id, user_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(role.as_deref().map(Role::parse))
}

/// Load an event the user belongs to. Missing event: `NotFound`;
/// not a member: `Forbidden`.
pub fn require_participant(conn: &Connection, event_id: &str, user_id: &str) -> AppResult<(Event, Role)> {
    let event = get_event(conn, event_id)?;
    let role = participant_role(conn, event_id, user_id)?.ok_or(AppError::Forbidden)?;
    Ok((event, role))
}

pub fn require_organizer(conn: &Connection, event_id: &str, user_id: &str) -> AppResult<Event> {
    match require_participant(conn, event_id, user_id)? {
        (event, Role::Organizer) => Ok(event),
        _ => Err(AppError::Forbidden),
    }
}

/// Join an event. The participant row and the counter change together, so
/// repeated joins by the same user count once.
pub fn join_event(conn: &mut Connection, event_id: &str, user_id: &str) -> AppResult<JoinOutcome> {
    let tx = write_transaction(conn)?;

    let event = get_event(&tx, event_id)?;
    if let Some(role) = participant_role(&tx, event_id, user_id)? {
        return Ok(JoinOutcome {
            event,
            role,
            newly_joined: false,
        });
    }
    if event.status() == EventStatus::Ended {
        return Err(AppError::Forbidden);
    }

    tx.execute(
        "INSERT INTO participants (event_id, user_id, role, photo_count, joined_at)
         VALUES (?1, ?2, 'participant', 0, ?3)",
        params![event_id, user_id, now_timestamp()],
    )?;
    tx.execute(
        "UPDATE events SET participant_count = participant_count + 1 WHERE id = ?1",
        params![event_id],
    )?;
    let event = get_event(&tx, event_id)?;
    tx.commit()?;

    tracing::info!("User {} joined event {}", user_id, event_id);
    Ok(JoinOutcome {
        event,
        role: Role::Participant,
        newly_joined: true,
    })
}

pub fn list_participants(conn: &Connection, event_id: &str) -> AppResult<Vec<Participant>> {
    let mut stmt = conn.prepare(
        "SELECT p.event_id, p.user_id, u.display_name, p.role, p.photo_count, p.joined_at
         FROM participants p
         JOIN users u ON u.id = p.user_id
         WHERE p.event_id = ?1
         ORDER BY p.joined_at ASC, p.user_id ASC",
    )?;

    let participants = stmt
        .query_map(params![event_id], |row| {
            Ok(Participant {
                event_id: row.get(0)?,
                user_id: row.get(1)?,
                display_name: row.get(2)?,
                role: Role::parse(&row.get::<_, String>(3)?),
                photo_count: row.get(4)?,
                joined_at: parse_timestamp(&row.get::<_, String>(5)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(participants)
}

pub fn set_cover_image(conn: &Connection, event_id: &str, blob_path: &str) -> AppResult<()> {
    let rows = conn.execute(
        "UPDATE events SET cover_image = ?2 WHERE id = ?1",
        params![event_id, blob_path],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_user, memory_pool};
    use chrono::Duration;

    fn new_event(name: &str) -> NewEvent {
        NewEvent {
            name: name.to_string(),
            description: Some("  Rooftop  ".to_string()),
            date: Utc::now() - Duration::hours(1),
            end_date: Some(Utc::now() + Duration::hours(5)),
            moderation: ModerationSettings::default(),
        }
    }

    #[test]
    fn create_event_persists_fields_and_organizer() {
        let pool = memory_pool();
        let mut conn = pool.get().unwrap();
        insert_user(&conn, "olga", "Olga");

        let input = new_event("  Summer Party ");
        let event = create_event(&mut conn, "olga", &input).unwrap();

        assert_eq!(event.name, "Summer Party");
        assert_eq!(event.description.as_deref(), Some("Rooftop"));
        assert_eq!(event.organizer_id, "olga");
        assert_eq!(event.participant_count, 1);
        assert_eq!(event.photo_count, 0);
        assert_eq!(event.date.timestamp_millis(), input.date.timestamp_millis());
        assert!(event.moderation.allow_downloads);
        assert_eq!(
            participant_role(&conn, &event.id, "olga").unwrap(),
            Some(Role::Organizer)
        );
    }

    #[test]
    fn create_event_rejects_bad_input() {
        let pool = memory_pool();
        let mut conn = pool.get().unwrap();
        insert_user(&conn, "olga", "Olga");

        let err = create_event(&mut conn, "olga", &new_event("   ")).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let mut backwards = new_event("Backwards");
        backwards.end_date = Some(backwards.date - Duration::hours(1));
        let err = create_event(&mut conn, "olga", &backwards).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn join_counts_each_user_once() {
        let pool = memory_pool();
        let mut conn = pool.get().unwrap();
        insert_user(&conn, "olga", "Olga");
        insert_user(&conn, "gus", "Gus");
        let event = create_event(&mut conn, "olga", &new_event("Party")).unwrap();

        let first = join_event(&mut conn, &event.id, "gus").unwrap();
        assert!(first.newly_joined);
        assert_eq!(first.event.participant_count, 2);

        let second = join_event(&mut conn, &event.id, "gus").unwrap();
        assert!(!second.newly_joined);
        assert_eq!(second.event.participant_count, 2);

        let organizer = join_event(&mut conn, &event.id, "olga").unwrap();
        assert_eq!(organizer.role, Role::Organizer);
        assert_eq!(get_event(&conn, &event.id).unwrap().participant_count, 2);
    }

    #[test]
    fn join_unknown_or_ended_event_fails() {
        let pool = memory_pool();
        let mut conn = pool.get().unwrap();
        insert_user(&conn, "olga", "Olga");
        insert_user(&conn, "gus", "Gus");

        assert!(matches!(
            join_event(&mut conn, "missing", "gus"),
            Err(AppError::NotFound)
        ));

        let mut past = new_event("Last year");
        past.date = Utc::now() - Duration::days(10);
        past.end_date = Some(Utc::now() - Duration::days(9));
        let event = create_event(&mut conn, "olga", &past).unwrap();
        assert!(matches!(
            join_event(&mut conn, &event.id, "gus"),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn membership_checks() {
        let pool = memory_pool();
        let mut conn = pool.get().unwrap();
        insert_user(&conn, "olga", "Olga");
        insert_user(&conn, "gus", "Gus");
        insert_user(&conn, "eve", "Eve");
        let event = create_event(&mut conn, "olga", &new_event("Party")).unwrap();
        join_event(&mut conn, &event.id, "gus").unwrap();

        assert!(require_organizer(&conn, &event.id, "olga").is_ok());
        assert!(matches!(
            require_organizer(&conn, &event.id, "gus"),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            require_participant(&conn, &event.id, "eve"),
            Err(AppError::Forbidden)
        ));

        let listed = list_events_for_user(&conn, "gus").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1, Role::Participant);
        assert!(list_events_for_user(&conn, "eve").unwrap().is_empty());

        let participants = list_participants(&conn, &event.id).unwrap();
        assert_eq!(participants.len(), 2);
        let olga = participants.iter().find(|p| p.user_id == "olga").unwrap();
        assert_eq!(olga.display_name, "Olga");
        assert_eq!(olga.role, Role::Organizer);
    }
}
