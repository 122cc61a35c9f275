//! Synthetic principal scoping.

use async_trait::async_trait;

use super::{Check, CheckContext, CheckFailure};
use crate::report::CheckFamily;

/// The synthetic principal's token is scoped to its own project and not to
/// the admin's.
#[derive(Debug, Clone)]
pub struct PrincipalIsolationCheck {
    name: String,
}

impl PrincipalIsolationCheck {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Check for PrincipalIsolationCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> CheckFamily {
        CheckFamily::Principal
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        let Some(principal) = ctx.principal else {
            return Err(CheckFailure::assertion("no principal session was created"));
        };
        let scoped = &principal.token().project_id;
        let project = principal.project();

        if scoped == &ctx.admin.token().project_id {
            return Err(CheckFailure::assertion(format!(
                "principal token is scoped to the admin project {}",
                scoped
            )));
        }
        if scoped != &project.id {
            return Err(CheckFailure::assertion(format!(
                "principal token project {} != expected {} ({})",
                scoped, project.id, project.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::ceph_world;
    use crate::release::Release;
    use crate::session::PrincipalSpec;

    #[tokio::test(start_paused = true)]
    async fn test_principal_has_own_project() {
        let world = ceph_world(Release::XenialQueens).await;
        let principal = world.admin.ensure_principal(&PrincipalSpec::default()).await.unwrap();
        let ctx = CheckContext {
            principal: Some(&principal),
            ..world.ctx()
        };
        PrincipalIsolationCheck::new("principal").run(&ctx).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_principal_fails() {
        let world = ceph_world(Release::XenialQueens).await;
        let err = PrincipalIsolationCheck::new("principal").run(&world.ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "no principal session was created");
    }
}
