use nestrbac_core::engine::AccessError;
use nestrbac_core::node::Hierarchy;
use nestrbac_core::path::PathError;
use nestrbac_storage::StorageError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum RbacError {
    #[error("access error: {0}")]
    Access(AccessError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("path error: {0}")]
    Path(#[from] PathError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("resetting {0} requires explicit confirmation")]
    ConfirmationRequired(&'static str),

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("permission not found: {0}")]
    PermissionNotFound(String),

    #[error("the root of {0} cannot be removed")]
    RootRemoval(Hierarchy),

    #[error("the root of {0} cannot be retitled")]
    RootRetitle(Hierarchy),
}

/// Path and capability failures met during evaluation surface the same way
/// as from a direct lookup.
impl From<AccessError> for RbacError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Path(e) => RbacError::Path(e),
            AccessError::UnsupportedBackend(what) => {
                RbacError::Storage(StorageError::UnsupportedBackend(what))
            }
            other => RbacError::Access(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestrbac_core::node::UserId;

    #[test]
    fn rbac_error_from_access_error() {
        let access_err = AccessError::Denied {
            permission: "/x/y".to_string(),
            user: UserId::new(7),
        };
        let err: RbacError = access_err.into();

        assert!(
            err.to_string().contains("/x/y"),
            "expected '/x/y' in error message, got: {err}"
        );
    }

    #[test]
    fn rbac_error_from_storage_error() {
        let storage_err = StorageError::SiblingOfRoot(Hierarchy::Roles);
        let err: RbacError = storage_err.into();

        assert!(
            err.to_string().contains("sibling"),
            "expected 'sibling' in error message, got: {err}"
        );
    }

    #[test]
    fn rbac_error_lifts_typed_access_errors() {
        let too_long: RbacError = AccessError::Path(PathError::PathTooLong {
            length: 20,
            limit: 8,
        })
        .into();
        let unsupported: RbacError =
            AccessError::UnsupportedBackend("ordered string aggregation".to_string()).into();

        assert!(matches!(
            too_long,
            RbacError::Path(PathError::PathTooLong { limit: 8, .. })
        ));
        assert!(matches!(
            unsupported,
            RbacError::Storage(StorageError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn rbac_error_from_path_error() {
        let err: RbacError = PathError::InvalidPath("a/b".to_string()).into();

        assert!(matches!(err, RbacError::Path(PathError::InvalidPath(_))));
    }

    #[test]
    fn confirmation_required_names_target() {
        let err = RbacError::ConfirmationRequired("roles");

        assert!(err.to_string().contains("roles"));
    }

    #[test]
    fn root_removal_names_hierarchy() {
        let err = RbacError::RootRemoval(Hierarchy::Permissions);

        assert!(err.to_string().contains("permissions"));
    }
}
