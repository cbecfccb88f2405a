//! Validation for caller-supplied workspace fields.
//!
//! Every check here runs before the control plane touches cluster state, so a
//! rejected request never leaves a partial Workspace behind.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, ValidationError};
use crate::quantity::parse_quantity;

pub const ID_MIN_LEN: usize = 6;
pub const ID_MAX_LEN: usize = 24;
pub const PORT_MIN: i64 = 1024;
pub const PORT_MAX: i64 = 65535;

static GIT_REPOSITORY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://\S+\.git$").expect("static regex"));

static MOUNT_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/(?:[\w-]+/)*(?:[\w-]+\.[\w-]+|[\w-]+/?)$").expect("static regex")
});

/// Validate a user or sandbox id.
///
/// Ids end up inside cluster object names, so besides the length bounds
/// they must be lowercase alphanumerics. '-' is reserved as the separator
/// in `ws-{uid}-{sid}`, which keeps every pair's name distinct.
pub fn validate_id(field: &'static str, id: &str) -> Result<()> {
    let len = id.len();
    if !(ID_MIN_LEN..=ID_MAX_LEN).contains(&len) {
        return Err(ValidationError::Length {
            field,
            min: ID_MIN_LEN,
            max: ID_MAX_LEN,
            len,
        });
    }

    let allowed = id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !allowed {
        return Err(ValidationError::Charset { field });
    }

    Ok(())
}

/// Validate the port the workspace container exposes.
pub fn validate_port(port: i64) -> Result<()> {
    if !(PORT_MIN..=PORT_MAX).contains(&port) {
        return Err(ValidationError::Port(port));
    }
    Ok(())
}

/// Validate an optional git repository; only https URLs ending in `.git` are cloned.
pub fn validate_git_repository(repo: Option<&str>) -> Result<()> {
    match repo {
        None | Some("") => Ok(()),
        Some(url) if GIT_REPOSITORY.is_match(url) => Ok(()),
        Some(url) => Err(ValidationError::GitRepository(url.to_string())),
    }
}

/// Validate the absolute path the workspace volume is mounted at.
pub fn validate_mount_path(path: &str) -> Result<()> {
    if MOUNT_PATH.is_match(path) {
        Ok(())
    } else {
        Err(ValidationError::MountPath(path.to_string()))
    }
}

/// Validate a single resource quantity; negative values are rejected.
pub fn validate_quantity(field: &'static str, value: &str) -> Result<()> {
    let quantity = parse_quantity(value).map_err(|reason| ValidationError::Quantity {
        field,
        reason,
    })?;

    if quantity.is_negative() {
        return Err(ValidationError::Quantity {
            field,
            reason: format!("'{}' is negative", value),
        });
    }

    Ok(())
}

/// Validate the cpu, memory and storage triple of a resource limit.
pub fn validate_resource_limit(cpu: &str, memory: &str, storage: &str) -> Result<()> {
    validate_quantity("cpu", cpu)?;
    validate_quantity("memory", memory)?;
    validate_quantity("storage", storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id_bounds() {
        assert!(validate_id("uid", "user01").is_ok());
        assert!(validate_id("uid", &"a".repeat(24)).is_ok());
        assert_eq!(
            validate_id("uid", "user1"),
            Err(ValidationError::Length {
                field: "uid",
                min: 6,
                max: 24,
                len: 5
            })
        );
        assert!(validate_id("sid", &"a".repeat(25)).is_err());
    }

    #[test]
    fn test_validate_id_charset() {
        assert!(validate_id("sid", "sand00001").is_ok());
        assert_eq!(
            validate_id("sid", "Sand00001"),
            Err(ValidationError::Charset { field: "sid" })
        );
        assert!(validate_id("sid", "sand_0001").is_err());
        assert!(validate_id("sid", "sand-0001").is_err());
        assert!(validate_id("sid", "-sand0001").is_err());
        assert!(validate_id("uid", "aaaaaa-b").is_err());
    }

    #[test]
    fn test_validate_port() {
        assert!(validate_port(1024).is_ok());
        assert!(validate_port(9999).is_ok());
        assert!(validate_port(65535).is_ok());
        assert_eq!(validate_port(80), Err(ValidationError::Port(80)));
        assert!(validate_port(65536).is_err());
    }

    #[test]
    fn test_validate_git_repository() {
        assert!(validate_git_repository(None).is_ok());
        assert!(validate_git_repository(Some("")).is_ok());
        assert!(validate_git_repository(Some("https://github.com/acme/widgets.git")).is_ok());
        assert!(validate_git_repository(Some("http://github.com/acme/widgets.git")).is_err());
        assert!(validate_git_repository(Some("https://github.com/acme/widgets")).is_err());
        assert!(validate_git_repository(Some("https://github.com/acme/wid gets.git")).is_err());
    }

    #[test]
    fn test_validate_mount_path() {
        assert!(validate_mount_path("/data").is_ok());
        assert!(validate_mount_path("/home/coder").is_ok());
        assert!(validate_mount_path("/home/coder/").is_ok());
        assert!(validate_mount_path("/opt/app.d").is_ok());
        assert!(validate_mount_path("/").is_err());
        assert!(validate_mount_path("data").is_err());
        assert!(validate_mount_path("/data//x").is_err());
        assert!(validate_mount_path("/da ta").is_err());
    }

    #[test]
    fn test_validate_resource_limit() {
        assert!(validate_resource_limit("2", "4Gi", "10Gi").is_ok());
        assert!(validate_resource_limit("500m", "512Mi", "1G").is_ok());

        let err = validate_resource_limit("2", "lots", "10Gi").unwrap_err();
        assert!(matches!(err, ValidationError::Quantity { field: "memory", .. }));

        let err = validate_resource_limit("-1", "4Gi", "10Gi").unwrap_err();
        assert!(matches!(err, ValidationError::Quantity { field: "cpu", .. }));
    }
}
