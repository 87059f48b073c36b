//! `local` provider (§4.7): no provisioning, `work_dir` is the process CWD.

use super::ExecutionContext;
use crate::error::Result;

pub async fn provision(ctx: &mut ExecutionContext) -> Result<()> {
    ctx.work_dir = std::env::current_dir()?;
    Ok(())
}

pub async fn cleanup(_ctx: &ExecutionContext) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provision_sets_work_dir_to_cwd() {
        let mut ctx = ExecutionContext::default();
        provision(&mut ctx).await.unwrap();
        assert_eq!(ctx.work_dir, std::env::current_dir().unwrap());
    }

    #[tokio::test]
    async fn cleanup_is_a_no_op() {
        let ctx = ExecutionContext::default();
        assert!(cleanup(&ctx).await.is_ok());
    }
}
