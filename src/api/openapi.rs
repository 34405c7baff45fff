use super::handlers::{analytics, auth, editor, health};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login, MFA, and session lifecycle".to_string());

    let mut editor_tag = Tag::new("editor");
    editor_tag.description = Some("Catalog records and asset staging".to_string());

    let mut analytics_tag = Tag::new("analytics");
    analytics_tag.description = Some("Download counters".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness".to_string());

    let mut openapi = cargo_openapi();
    openapi.tags = Some(vec![auth_tag, editor_tag, analytics_tag, health_tag]);

    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the route to OpenAPI.
    let router = OpenApiRouter::with_openapi(openapi)
        .routes(routes!(health::health))
        .routes(routes!(auth::oidc::login))
        .routes(routes!(auth::oidc::callback))
        .routes(routes!(auth::session::csrf_token))
        .routes(routes!(auth::session::logout))
        .routes(routes!(auth::mfa::webauthn_challenge))
        .routes(routes!(auth::mfa::webauthn_verify))
        .routes(routes!(auth::mfa::totp_verify))
        .routes(routes!(analytics::get_downloads, analytics::record_download))
        .routes(routes!(editor::list_projects, editor::create_project))
        .routes(routes!(
            editor::get_project,
            editor::update_project,
            editor::delete_project
        ))
        .routes(routes!(editor::uploads::stage_upload))
        .routes(routes!(editor::uploads::cancel_upload));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    let (name, email) = match primary.find('<') {
        Some(start) => (
            primary[..start].trim(),
            primary[start + 1..].trim_end_matches('>').trim(),
        ),
        None => (primary, ""),
    };
    if name.is_empty() && email.is_empty() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = (!name.is_empty()).then(|| name.to_string());
    contact.email = (!email.is_empty()).then(|| email.to_string());
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));

        let contact = spec.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Vestibule"));
            assert_eq!(contact.email.as_deref(), Some("team@vestibule.dev"));
        }
    }

    #[test]
    fn openapi_tags_and_paths() {
        let spec = openapi();
        let tags = spec.tags.clone().unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "auth"));
        assert!(tags.iter().any(|tag| tag.name == "editor"));

        assert!(spec.paths.paths.contains_key("/auth/webauthn/verify"));
        assert!(spec.paths.paths.contains_key("/analytics/downloads"));
        assert!(spec.paths.paths.contains_key("/editor/projects/{id}"));
        assert!(spec.paths.paths.contains_key("/editor/uploads"));
    }
}
