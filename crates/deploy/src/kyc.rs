//! Operations of the KYC contract, with method names taken from [`ContractNaming`].
//!
//! [`ContractNaming`]: crate::config::ContractNaming

use alloy_core::primitives::{Address, U256};
use anyhow::Result;

use crate::{
    context::DeployContext, contract::ContractHandle, rpc::TransactionReceipt, signer::Signer,
};

/// The deployed KYC contract of a context.
#[derive(Debug)]
pub struct Kyc<'a> {
    ctx: &'a DeployContext,
    handle: ContractHandle,
}

impl<'a> Kyc<'a> {
    /// The stored deployment of the configured contract.
    pub fn load(ctx: &'a DeployContext) -> Result<Self> {
        let handle = ctx.contract(&ctx.naming().name)?;
        Ok(Self { ctx, handle })
    }

    pub fn handle(&self) -> &ContractHandle {
        &self.handle
    }

    pub fn address(&self) -> Address {
        self.handle.address()
    }

    /// Owner recorded by the contract.
    pub async fn owner(&self) -> Result<Address> {
        self.handle
            .call_address(self.ctx.rpc(), None, &self.ctx.naming().owner_method, &[])
            .await
    }

    /// Register a user as `signer`.
    pub async fn add_user(
        &self,
        signer: &Signer,
        name: &str,
        id: &str,
        dob: &str,
    ) -> Result<TransactionReceipt> {
        self.handle
            .send(
                self.ctx.rpc(),
                self.ctx.chain_id(),
                signer,
                &self.ctx.naming().register_method,
                &[name.to_string(), id.to_string(), dob.to_string()],
                self.ctx.confirmation_timeout(),
            )
            .await
    }

    /// Number of records held by `account`.
    ///
    /// The count method either takes the account as argument or reads it from the
    /// caller, depending on the contract revision.
    pub async fn record_count(&self, account: Address) -> Result<U256> {
        let method = &self.ctx.naming().count_method;
        let args = if self.handle.has_method(method, 1) {
            vec![account.to_string()]
        } else {
            Vec::new()
        };

        self.handle
            .call_uint(self.ctx.rpc(), Some(account), method, &args)
            .await
    }
}
