//! Read-only operator tasks.

use alloy_core::primitives::Address;
use anyhow::Result;

use crate::context::DeployContext;

/// Accounts able to sign on the connected network.
pub async fn accounts(ctx: &DeployContext) -> Result<Vec<Address>> {
    ctx.accounts().await
}

/// Current block height of the connected network.
pub async fn block_number(ctx: &DeployContext) -> Result<u64> {
    ctx.rpc().block_number().await
}
