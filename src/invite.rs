use qrcode::render::svg;
use qrcode::QrCode;
use serde::Serialize;
use url::Url;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, async_graphql::SimpleObject)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    /// Link a guest opens to join the event.
    pub link: String,
    /// The same link as an SVG QR code.
    pub qr_svg: String,
}

pub fn invite_link(base_url: &str, event_id: &str) -> AppResult<String> {
    let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
        .map_err(|e| AppError::Internal(format!("Invalid public URL {}: {}", base_url, e)))?;
    let link = base
        .join(&format!("events/{}/join", event_id))
        .map_err(|e| AppError::Internal(format!("Invalid invite link: {}", e)))?;
    Ok(link.to_string())
}

pub fn build_invite(base_url: &str, event_id: &str) -> AppResult<Invite> {
    let link = invite_link(base_url, event_id)?;

    let code = QrCode::new(link.as_bytes()).map_err(|e| {
        tracing::error!("QR code generation failed: {}", e);
        AppError::Internal("QR code generation failed".into())
    })?;

    let qr_svg = code
        .render::<svg::Color>()
        .min_dimensions(200, 200)
        .max_dimensions(300, 300)
        .dark_color(svg::Color("#1c1917"))
        .light_color(svg::Color("#ffffff"))
        .build();

    Ok(Invite { link, qr_svg })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_points_at_join_page() {
        assert_eq!(
            invite_link("https://photos.example.com", "e1").unwrap(),
            "https://photos.example.com/events/e1/join"
        );
        assert_eq!(
            invite_link("https://example.com/party/", "e1").unwrap(),
            "https://example.com/party/events/e1/join"
        );
    }

    #[test]
    fn invite_carries_svg_qr_code() {
        let invite = build_invite("http://localhost:3000", "e1").unwrap();
        assert!(invite.qr_svg.contains("<svg"));
        assert_eq!(invite.link, "http://localhost:3000/events/e1/join");
    }

    #[test]
    fn garbage_base_url_is_an_internal_error() {
        assert!(matches!(
            invite_link("not a url", "e1"),
            Err(AppError::Internal(_))
        ));
    }
}
