//! Turns role assignments into the permission set carried by a token.

use crate::error::AccessError;
use crate::role::PermissionSet;
use crate::store::Store;
use rootcause::Report;
use rootcause::prelude::ResultExt;
use std::sync::Arc;
use thor_core::UserId;
use tracing::{debug, instrument, warn};

/// Computes the permissions of a user from the live role graph.
///
/// Nothing is cached; every call reads the current assignments.
#[derive(Clone)]
pub struct PermissionAggregator {
    store: Arc<dyn Store>,
}

impl PermissionAggregator {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Returns the union of the permissions of every role assigned to the
    /// user. A user without roles gets an empty set.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn permissions_of(
        &self,
        user_id: UserId,
    ) -> Result<PermissionSet, Report<AccessError>> {
        let roles = self
            .store
            .roles_of_user(user_id)
            .await
            .context(AccessError::LookupFailed { user_id })?;

        let mut permissions = PermissionSet::new();
        for role in &roles {
            let granted = match self.store.permissions_of_role(role.id()).await {
                Ok(granted) => granted,
                // Deleted after the assignments were listed; it grants nothing.
                Err(report) if report.current_context().is_not_found() => {
                    warn!(role_id = %role.id(), "role disappeared during aggregation");
                    continue;
                }
                Err(report) => {
                    return Err::<PermissionSet, _>(report)
                        .context(AccessError::LookupFailed { user_id });
                }
            };
            permissions.extend(granted);
        }

        debug!(
            roles = roles.len(),
            permissions = permissions.len(),
            "aggregated permissions"
        );
        Ok(permissions)
    }
}
