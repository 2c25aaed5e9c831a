//! In-memory chain implementing every outbound port.
//!
//! Registry reads replay the event log up to the requested timestamp, so
//! `*_at` reads behave like the contracts' checkpointed getters.

use async_trait::async_trait;
use parking_lot::RwLock;
use primitive_types::U256;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use super::outbound::{
    ChainEventSource, EventBatch, RegistryReader, SettlementReader, SettlementWriter, StakeReader,
};
use crate::domain::{
    Address, ChainEvent, Epoch, ExtraData, Hash, Key, KeyTag, QuorumProof, SettlementError,
    SettlementResult, SlashingData, Timestamp, ValSetCommit, ValSetHeader, VaultInfo,
};

/// Write call received by the mock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    /// `setKey`
    SetKey {
        /// Operator
        operator: Address,
        /// Key tag
        tag: KeyTag,
        /// Key payload
        payload: Vec<u8>,
    },
    /// `commitValSetHeader`
    CommitValSetHeader(Epoch),
    /// `setGenesis`
    SetGenesis(Epoch),
    /// `registerOperator`
    RegisterOperator(Address),
    /// `unregisterOperator`
    UnregisterOperator(Address),
}

#[derive(Default)]
struct MockState {
    genesis_epoch: Option<Epoch>,
    commits: BTreeMap<Epoch, ValSetCommit>,
    log: Vec<ChainEvent>,
    stakes: HashMap<(Address, Address), Vec<(Timestamp, U256)>>,
    vault_info: HashMap<Address, VaultInfo>,
    submissions: Vec<Submission>,
    now: Timestamp,
}

#[derive(Default)]
struct RegistryView {
    operators: BTreeSet<Address>,
    operator_vaults: BTreeMap<Address, BTreeSet<Address>>,
    shared_vaults: BTreeSet<Address>,
    tokens: BTreeSet<Address>,
    slashing: SlashingData,
    keys: BTreeMap<(Address, KeyTag), Vec<u8>>,
}

impl MockState {
    fn registry_at(&self, timestamp: Timestamp) -> RegistryView {
        let mut view = RegistryView::default();
        for event in &self.log {
            match event {
                ChainEvent::SetKey {
                    operator,
                    tag,
                    payload,
                    timestamp: t,
                } if *t <= timestamp => {
                    view.keys.insert((*operator, *tag), payload.clone());
                }
                ChainEvent::RegisterOperator { operator, timestamp: t } if *t <= timestamp => {
                    view.operators.insert(*operator);
                }
                ChainEvent::UnregisterOperator { operator, timestamp: t } if *t <= timestamp => {
                    view.operators.remove(operator);
                }
                ChainEvent::RegisterOperatorVault {
                    operator,
                    vault,
                    timestamp: t,
                } if *t <= timestamp => {
                    view.operator_vaults.entry(*operator).or_default().insert(*vault);
                }
                ChainEvent::UnregisterOperatorVault {
                    operator,
                    vault,
                    timestamp: t,
                } if *t <= timestamp => {
                    if let Some(vaults) = view.operator_vaults.get_mut(operator) {
                        vaults.remove(vault);
                    }
                }
                ChainEvent::RegisterSharedVault { vault, timestamp: t } if *t <= timestamp => {
                    view.shared_vaults.insert(*vault);
                }
                ChainEvent::UnregisterSharedVault { vault, timestamp: t } if *t <= timestamp => {
                    view.shared_vaults.remove(vault);
                }
                ChainEvent::RegisterToken { token, timestamp: t } if *t <= timestamp => {
                    view.tokens.insert(*token);
                }
                ChainEvent::UnregisterToken { token, timestamp: t } if *t <= timestamp => {
                    view.tokens.remove(token);
                }
                ChainEvent::SetSlashingData { data, timestamp: t } if *t <= timestamp => {
                    view.slashing = *data;
                }
                _ => {}
            }
        }
        view
    }
}

/// Mock chain for tests, with failure and latency injection.
#[derive(Default)]
pub struct MockChain {
    state: RwLock<MockState>,
    fail_next: AtomicU32,
    latency_ms: AtomicU64,
    calls: AtomicU64,
}

impl MockChain {
    /// Empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a transient RPC error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of port calls served (including failed ones).
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Timestamp attached to events produced by writer calls.
    pub fn set_timestamp(&self, now: Timestamp) {
        self.state.write().now = now;
    }

    /// Append an event to the log.
    pub fn emit(&self, event: ChainEvent) {
        self.state.write().log.push(event);
    }

    /// Set the genesis commit and emit `SetGenesis`.
    pub fn set_genesis_commit(&self, header: ValSetHeader, extra_data: ExtraData) {
        let mut state = self.state.write();
        let epoch = header.epoch;
        state.genesis_epoch = Some(epoch);
        state.commits.insert(
            epoch,
            ValSetCommit {
                header,
                extra_data,
                proof: None,
            },
        );
        state.log.push(ChainEvent::SetGenesis { epoch });
    }

    /// Add a commit and emit `CommitValSetHeader`.
    pub fn push_commit(&self, commit: ValSetCommit) {
        let mut state = self.state.write();
        let epoch = commit.header.epoch;
        state.commits.insert(epoch, commit);
        state.log.push(ChainEvent::CommitValSetHeader { epoch });
    }

    /// Overwrite a commit without emitting anything (reorg simulation).
    pub fn replace_commit(&self, commit: ValSetCommit) {
        let mut state = self.state.write();
        state.commits.insert(commit.header.epoch, commit);
    }

    /// Drop every commit after `epoch`.
    pub fn rollback_to(&self, epoch: Epoch) {
        let mut state = self.state.write();
        state.commits.retain(|e, _| *e <= epoch);
    }

    /// Record the stake of `operator` in `vault` from `timestamp` on.
    pub fn set_stake(&self, vault: Address, operator: Address, timestamp: Timestamp, amount: U256) {
        let mut state = self.state.write();
        let history = state.stakes.entry((vault, operator)).or_default();
        history.push((timestamp, amount));
        history.sort_by_key(|(t, _)| *t);
    }

    /// Set vault metadata.
    pub fn set_vault_info(&self, vault: Address, info: VaultInfo) {
        self.state.write().vault_info.insert(vault, info);
    }

    /// Write calls received so far.
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.read().submissions.clone()
    }

    async fn enter(&self) -> SettlementResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(SettlementError::Rpc("injected failure".to_string()));
        }
        Ok(())
    }

    fn submit(&self, submission: Submission, event: Option<ChainEvent>) {
        let mut state = self.state.write();
        state.submissions.push(submission);
        if let Some(event) = event {
            state.log.push(event);
        }
    }
}

#[async_trait]
impl SettlementReader for MockChain {
    async fn get_last_committed_header_epoch(&self) -> SettlementResult<Option<Epoch>> {
        self.enter().await?;
        Ok(self.state.read().commits.keys().next_back().copied())
    }

    async fn get_genesis_commit(&self) -> SettlementResult<Option<ValSetCommit>> {
        self.enter().await?;
        let state = self.state.read();
        Ok(state
            .genesis_epoch
            .and_then(|epoch| state.commits.get(&epoch).cloned()))
    }

    async fn get_val_set_commit(&self, epoch: Epoch) -> SettlementResult<ValSetCommit> {
        self.enter().await?;
        self.state
            .read()
            .commits
            .get(&epoch)
            .cloned()
            .ok_or(SettlementError::HeaderNotCommitted { epoch })
    }

    async fn get_val_set_header_hash_at(&self, epoch: Epoch) -> SettlementResult<Hash> {
        self.enter().await?;
        self.state
            .read()
            .commits
            .get(&epoch)
            .map(|c| c.header.hash())
            .ok_or(SettlementError::HeaderNotCommitted { epoch })
    }
}

#[async_trait]
impl RegistryReader for MockChain {
    async fn get_operators_at(&self, timestamp: Timestamp) -> SettlementResult<Vec<Address>> {
        self.enter().await?;
        let view = self.state.read().registry_at(timestamp);
        Ok(view.operators.into_iter().collect())
    }

    async fn get_keys_at(&self, timestamp: Timestamp) -> SettlementResult<Vec<(Address, Key)>> {
        self.enter().await?;
        let view = self.state.read().registry_at(timestamp);
        Ok(view
            .keys
            .into_iter()
            .map(|((operator, tag), payload)| (operator, Key { tag, payload }))
            .collect())
    }

    async fn get_shared_vaults_at(&self, timestamp: Timestamp) -> SettlementResult<Vec<Address>> {
        self.enter().await?;
        let view = self.state.read().registry_at(timestamp);
        Ok(view.shared_vaults.into_iter().collect())
    }

    async fn get_operator_vaults_at(
        &self,
        operator: Address,
        timestamp: Timestamp,
    ) -> SettlementResult<Vec<Address>> {
        self.enter().await?;
        let mut view = self.state.read().registry_at(timestamp);
        Ok(view
            .operator_vaults
            .remove(&operator)
            .map(|v| v.into_iter().collect())
            .unwrap_or_default())
    }

    async fn get_tokens_at(&self, timestamp: Timestamp) -> SettlementResult<Vec<Address>> {
        self.enter().await?;
        let view = self.state.read().registry_at(timestamp);
        Ok(view.tokens.into_iter().collect())
    }

    async fn get_slashing_data_at(&self, timestamp: Timestamp) -> SettlementResult<SlashingData> {
        self.enter().await?;
        Ok(self.state.read().registry_at(timestamp).slashing)
    }
}

#[async_trait]
impl StakeReader for MockChain {
    async fn get_operator_stake_at(
        &self,
        vault: Address,
        operator: Address,
        timestamp: Option<Timestamp>,
    ) -> SettlementResult<U256> {
        self.enter().await?;
        let state = self.state.read();
        let Some(history) = state.stakes.get(&(vault, operator)) else {
            return Ok(U256::zero());
        };
        let stake = history
            .iter()
            .rev()
            .find(|(t, _)| timestamp.map_or(true, |ts| *t <= ts))
            .map(|(_, amount)| *amount)
            .unwrap_or_default();
        Ok(stake)
    }

    async fn get_vault_info(&self, vault: Address) -> SettlementResult<VaultInfo> {
        self.enter().await?;
        self.state
            .read()
            .vault_info
            .get(&vault)
            .copied()
            .ok_or_else(|| SettlementError::Rpc(format!("unknown vault 0x{}", hex::encode(vault))))
    }
}

#[async_trait]
impl SettlementWriter for MockChain {
    async fn set_key(
        &self,
        operator: Address,
        tag: KeyTag,
        payload: Vec<u8>,
        _signature: Vec<u8>,
        _extra_data: Vec<u8>,
    ) -> SettlementResult<()> {
        self.enter().await?;
        let timestamp = self.state.read().now;
        self.submit(
            Submission::SetKey {
                operator,
                tag,
                payload: payload.clone(),
            },
            Some(ChainEvent::SetKey {
                operator,
                tag,
                payload,
                timestamp,
            }),
        );
        Ok(())
    }

    async fn commit_val_set_header(
        &self,
        header: ValSetHeader,
        extra_data: ExtraData,
        proof: QuorumProof,
    ) -> SettlementResult<()> {
        self.enter().await?;
        let epoch = header.epoch;
        self.submit(Submission::CommitValSetHeader(epoch), None);
        self.push_commit(ValSetCommit {
            header,
            extra_data,
            proof: Some(proof),
        });
        Ok(())
    }

    async fn set_genesis(&self, header: ValSetHeader, extra_data: ExtraData) -> SettlementResult<()> {
        self.enter().await?;
        self.submit(Submission::SetGenesis(header.epoch), None);
        self.set_genesis_commit(header, extra_data);
        Ok(())
    }

    async fn register_operator(&self, operator: Address) -> SettlementResult<()> {
        self.enter().await?;
        let timestamp = self.state.read().now;
        self.submit(
            Submission::RegisterOperator(operator),
            Some(ChainEvent::RegisterOperator { operator, timestamp }),
        );
        Ok(())
    }

    async fn unregister_operator(&self, operator: Address) -> SettlementResult<()> {
        self.enter().await?;
        let timestamp = self.state.read().now;
        self.submit(
            Submission::UnregisterOperator(operator),
            Some(ChainEvent::UnregisterOperator { operator, timestamp }),
        );
        Ok(())
    }
}

#[async_trait]
impl ChainEventSource for MockChain {
    async fn poll_events(&self, from_block: u64) -> SettlementResult<EventBatch> {
        self.enter().await?;
        let state = self.state.read();
        let start = (from_block as usize).min(state.log.len());
        Ok(EventBatch {
            events: state.log[start..].to_vec(),
            next_block: state.log.len() as u64,
        })
    }
}
