//! # Settlement Engine
//!
//! Owns the committed-header timeline and composes key resolution, voting
//! power aggregation and quorum verification behind [`SettlementApi`].
//!
//! ## Commit Flow
//!
//! ```text
//! commit_val_set_header(header, extra_data, proof)
//!   │
//!   ├── epoch = last + 1, capture timestamp increases
//!   ├── extra-data keys unique, version, threshold ≤ total
//!   ├── proof vs. previous epoch's frozen set + threshold  (hand-off)
//!   ├── derived validator set vs. header root / total      (optional)
//!   └── append {header, extra_data, validator_set}  ──→ one snapshot swap
//! ```
//!
//! Every check runs before the append, so a rejected commit leaves the
//! timeline untouched.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use settlement_telemetry::{
    log_epoch_event, HistogramTimer, COMMITS_REJECTED, EVENTS_APPLIED, HEADERS_COMMITTED,
    LAST_COMMITTED_EPOCH, QUORUM_DURATION, QUORUM_VERIFICATIONS, REORGS_DETECTED,
    SIGNERS_EXCLUDED, SYNC_STATE,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::algorithms::{
    verify_quorum, CheckpointStore, KeyResolver, Membership, PowerCurves, QuorumVerdict,
    SchemeRegistry, VotingPowerAggregator,
};
use crate::config::SettlementConfig;
use crate::domain::{
    invariant_matches_validator_set, invariant_monotonic, invariant_quorum_within_total,
    invariant_version, next_state, Address, ChainEvent, Epoch, ExtraData, Hash, KeyTag,
    QuorumProof, SettlementError, SettlementResult, SyncEvent, SyncState, Timestamp,
    ValSetHeader, ValidatorSet, VaultValue, VotingPower,
};
use crate::ports::{ChainClient, RegistryReader, SettlementApi, SettlementWriter};

/// One committed epoch: header, extra data and the validator set it froze.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedValSet {
    /// Committed header
    pub header: ValSetHeader,
    /// Extra data committed with it
    pub extra_data: ExtraData,
    /// Validator set derived at the header's capture timestamp
    pub validator_set: ValidatorSet,
}

/// Settlement engine.
///
/// Single writer (the sync task) and any number of readers. Reads go
/// through lock-free snapshots and never wait on a commit in flight.
pub struct SettlementEngine<C: ChainClient + ?Sized> {
    config: SettlementConfig,
    chain: Arc<C>,
    schemes: SchemeRegistry,
    keys: KeyResolver,
    power: VotingPowerAggregator<C>,
    /// Committed headers keyed by epoch.
    timeline: CheckpointStore<(), Arc<CommittedValSet>>,
    state: RwLock<SyncState>,
    /// Latest membership/key event timestamp applied (0 = none).
    last_event_at: AtomicU64,
    writer: Mutex<()>,
}

impl<C: ChainClient + ?Sized> SettlementEngine<C> {
    /// Create an engine with empty registry caches and no genesis.
    pub fn new(
        config: SettlementConfig,
        chain: Arc<C>,
        schemes: SchemeRegistry,
        curves: PowerCurves,
    ) -> Self {
        let power = VotingPowerAggregator::new(chain.clone(), curves, config.include_zero_power);
        SYNC_STATE.set(SyncState::default().as_gauge());
        Self {
            keys: KeyResolver::new(schemes.clone()),
            config,
            chain,
            schemes,
            power,
            timeline: CheckpointStore::new(),
            state: RwLock::new(SyncState::default()),
            last_event_at: AtomicU64::new(0),
            writer: Mutex::new(()),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Chain client the engine reads through.
    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    /// Registered signature schemes.
    pub fn schemes(&self) -> &SchemeRegistry {
        &self.schemes
    }

    /// Key resolver.
    pub fn keys(&self) -> &KeyResolver {
        &self.keys
    }

    /// Voting power aggregator.
    pub fn voting_power(&self) -> &VotingPowerAggregator<C> {
        &self.power
    }

    // =========================================================================
    // SYNC STATE
    // =========================================================================

    /// Current sync state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Apply a sync event and publish the resulting state.
    pub fn transition(&self, event: SyncEvent) -> SyncState {
        let mut state = self.state.write();
        let next = next_state(*state, event);
        if next != *state {
            info!(
                "[settlement] sync state {:?} -> {:?} ({:?})",
                *state, next, event
            );
            *state = next;
        }
        SYNC_STATE.set(next.as_gauge());
        next
    }

    // =========================================================================
    // HEADER TIMELINE: WRITES
    // =========================================================================

    /// Record the genesis header. Only allowed from `Uninitialized`.
    pub async fn set_genesis(
        &self,
        header: ValSetHeader,
        extra_data: ExtraData,
    ) -> SettlementResult<()> {
        let _writer = self.writer.lock().await;
        let epoch = header.epoch;
        let result = self.try_set_genesis(header, extra_data).await;
        if let Err(e) = &result {
            self.reject(epoch, e);
        }
        result
    }

    async fn try_set_genesis(
        &self,
        header: ValSetHeader,
        extra_data: ExtraData,
    ) -> SettlementResult<()> {
        if self.state().is_initialized() || self.get_last_committed_epoch().is_some() {
            return Err(SettlementError::GenesisAlreadySet);
        }
        self.check_header(&header, &extra_data)?;

        let validator_set = self.derive_checked_set(&header).await?;
        let epoch = header.epoch;
        let validators = validator_set.len();
        self.append(CommittedValSet {
            header,
            extra_data,
            validator_set,
        })?;

        self.transition(SyncEvent::GenesisSet);
        self.transition(SyncEvent::CaughtUp);
        log_epoch_event!(info, "[settlement] genesis set", epoch, validators = validators);
        Ok(())
    }

    /// Commit the next header, attested by the previous epoch's validators.
    pub async fn commit_val_set_header(
        &self,
        header: ValSetHeader,
        extra_data: ExtraData,
        proof: Option<QuorumProof>,
    ) -> SettlementResult<QuorumVerdict> {
        let _writer = self.writer.lock().await;
        let epoch = header.epoch;
        let result = self.try_commit(header, extra_data, proof).await;
        if let Err(e) = &result {
            self.reject(epoch, e);
        }
        result
    }

    async fn try_commit(
        &self,
        header: ValSetHeader,
        extra_data: ExtraData,
        proof: Option<QuorumProof>,
    ) -> SettlementResult<QuorumVerdict> {
        let previous = self.latest_committed()?;
        let proof = proof.ok_or(SettlementError::MissingProof)?;
        invariant_monotonic(&previous.header, &header)?;
        self.check_header(&header, &extra_data)?;

        let message = header.commit_message(&extra_data);
        let verdict = self
            .check_quorum(
                &previous.validator_set,
                &message,
                previous.header.required_key_tag,
                previous.header.quorum_threshold,
                &proof,
                "commit",
            )?
            .into_result()?;

        let validator_set = self.derive_checked_set(&header).await?;
        let epoch = header.epoch;
        self.append(CommittedValSet {
            header,
            extra_data,
            validator_set,
        })?;

        self.transition(SyncEvent::CaughtUp);
        log_epoch_event!(
            info,
            "[settlement] header committed",
            epoch,
            signed_power = %verdict.signed_power,
            signers = verdict.accepted.len()
        );
        Ok(verdict)
    }

    fn check_header(&self, header: &ValSetHeader, extra_data: &ExtraData) -> SettlementResult<()> {
        extra_data.validate()?;
        invariant_version(header, self.config.supported_header_version)?;
        invariant_quorum_within_total(header)?;
        self.schemes.get(header.required_key_tag)?;
        Ok(())
    }

    async fn derive_checked_set(&self, header: &ValSetHeader) -> SettlementResult<ValidatorSet> {
        let set = self
            .power
            .derive_validator_set(&self.keys, Some(header.capture_timestamp))
            .await?;
        if self.config.verify_validator_set {
            invariant_matches_validator_set(header, &set)?;
        }
        Ok(set)
    }

    fn append(&self, committed: CommittedValSet) -> SettlementResult<()> {
        let epoch = committed.header.epoch;
        self.timeline.record((), epoch, Arc::new(committed))?;
        HEADERS_COMMITTED.inc();
        LAST_COMMITTED_EPOCH.set(epoch as f64);
        Ok(())
    }

    fn reject(&self, epoch: Epoch, err: &SettlementError) {
        COMMITS_REJECTED.with_label_values(&[err.label()]).inc();
        warn!("[settlement] header for epoch {} rejected: {}", epoch, err);
    }

    /// Drop every committed epoch from `epoch` on, and the key and registry
    /// checkpoints from that epoch's capture timestamp on.
    ///
    /// Returns the capture timestamp the caches were truncated from.
    pub async fn invalidate_from(&self, epoch: Epoch) -> SettlementResult<Timestamp> {
        let _writer = self.writer.lock().await;
        let from = self.committed_at(epoch)?.header.capture_timestamp;

        let epochs = self.timeline.truncate_from(&(), epoch);
        let keys = self.keys.truncate_from(from);
        let points = self.power.truncate_from(from);
        REORGS_DETECTED.inc();
        error!(
            "[settlement] CRITICAL: committed history invalidated from epoch {} \
             ({} epochs, {} key and {} registry checkpoints since {})",
            epoch, epochs, keys, points, from
        );

        match self.get_last_committed_epoch() {
            Some(last) => {
                LAST_COMMITTED_EPOCH.set(last as f64);
                self.transition(SyncEvent::EpochMissed);
            }
            None => {
                LAST_COMMITTED_EPOCH.set(0.0);
                self.transition(SyncEvent::Reset);
            }
        }
        Ok(from)
    }

    // =========================================================================
    // HEADER TIMELINE: READS
    // =========================================================================

    /// Committed entry for exactly `epoch`.
    pub fn committed_at(&self, epoch: Epoch) -> SettlementResult<Arc<CommittedValSet>> {
        match self.timeline.query(&(), epoch, None) {
            Ok(committed) if committed.header.epoch == epoch => Ok(committed),
            _ => Err(SettlementError::HeaderNotCommitted { epoch }),
        }
    }

    /// Most recent committed entry.
    pub fn latest_committed(&self) -> SettlementResult<Arc<CommittedValSet>> {
        self.timeline
            .query_latest(&())
            .map_err(|_| SettlementError::NotInitialized)
    }

    /// Latest committed header.
    pub fn get_val_set_header(&self) -> SettlementResult<ValSetHeader> {
        Ok(self.latest_committed()?.header.clone())
    }

    /// Header committed for `epoch`.
    pub fn get_val_set_header_at(&self, epoch: Epoch) -> SettlementResult<ValSetHeader> {
        Ok(self.committed_at(epoch)?.header.clone())
    }

    /// Extra-data value under `key` for `epoch`.
    pub fn get_extra_data_at(&self, epoch: Epoch, key: &Hash) -> SettlementResult<Option<Hash>> {
        Ok(self.committed_at(epoch)?.extra_data.get(key))
    }

    /// Whether `epoch` has a committed header.
    pub fn is_val_set_header_committed_at(&self, epoch: Epoch) -> bool {
        self.committed_at(epoch).is_ok()
    }

    /// Genesis epoch, `None` before genesis.
    pub fn get_first_committed_epoch(&self) -> Option<Epoch> {
        let snapshot = self.timeline.snapshot();
        snapshot.trace(&()).and_then(|trace| trace.get(0)).map(|c| c.at)
    }

    /// Latest epoch whose capture timestamp is at or before `timestamp`.
    pub fn get_epoch_at(&self, timestamp: Timestamp) -> SettlementResult<Epoch> {
        let snapshot = self.timeline.snapshot();
        let trace = snapshot
            .trace(&())
            .filter(|trace| !trace.is_empty())
            .ok_or(SettlementError::NotInitialized)?;

        // capture timestamps increase with the epoch
        let (mut low, mut high) = (0, trace.len());
        while low < high {
            let mid = low + (high - low) / 2;
            match trace.get(mid) {
                Some(c) if c.value.header.capture_timestamp <= timestamp => low = mid + 1,
                _ => high = mid,
            }
        }
        low.checked_sub(1)
            .and_then(|index| trace.get(index))
            .map(|c| c.at)
            .ok_or(SettlementError::NoCheckpointBefore { at: timestamp })
    }

    /// Last committed epoch, `None` before genesis.
    pub fn get_last_committed_epoch(&self) -> Option<Epoch> {
        self.timeline
            .query_latest(&())
            .ok()
            .map(|committed| committed.header.epoch)
    }

    /// Hash of the header committed for `epoch`.
    pub fn get_val_set_header_hash_at(&self, epoch: Epoch) -> SettlementResult<Hash> {
        Ok(self.committed_at(epoch)?.header.hash())
    }

    /// Validator set frozen at `epoch`.
    pub fn get_validator_set_at(&self, epoch: Epoch) -> SettlementResult<ValidatorSet> {
        Ok(self.committed_at(epoch)?.validator_set.clone())
    }

    // =========================================================================
    // QUORUM VERIFICATION
    // =========================================================================

    fn check_quorum(
        &self,
        set: &ValidatorSet,
        message: &[u8],
        key_tag: KeyTag,
        threshold: VotingPower,
        proof: &QuorumProof,
        mode: &'static str,
    ) -> SettlementResult<QuorumVerdict> {
        let _timer = HistogramTimer::new(&QUORUM_DURATION);
        let verdict = verify_quorum(&self.schemes, set, message, key_tag, threshold, proof)?;

        let result = if verdict.is_accepted() {
            "accepted"
        } else {
            "rejected"
        };
        QUORUM_VERIFICATIONS.with_label_values(&[result, mode]).inc();

        if !verdict.rejected.is_empty() {
            SIGNERS_EXCLUDED.inc_by(verdict.rejected.len() as u64);
            for (operator, reason) in &verdict.rejected {
                warn!(
                    "[settlement] signer 0x{} excluded ({:?})",
                    hex::encode(operator),
                    reason
                );
            }
        }

        debug!(
            "[settlement] {} quorum {}: {} of {} required",
            mode, result, verdict.signed_power, verdict.threshold
        );
        Ok(verdict)
    }

    /// Verify `proof` against current keys and live voting power.
    ///
    /// Stake reads go straight to the chain and are not retried.
    pub async fn verify_quorum_sig(
        &self,
        message: &[u8],
        key_tag: KeyTag,
        threshold: VotingPower,
        proof: &QuorumProof,
    ) -> SettlementResult<QuorumVerdict> {
        let set = self.power.derive_validator_set(&self.keys, None).await?;
        self.check_quorum(&set, message, key_tag, threshold, proof, "live")
    }

    /// Verify `proof` against the validator set frozen at `epoch`.
    pub fn verify_quorum_sig_at(
        &self,
        message: &[u8],
        key_tag: KeyTag,
        threshold: VotingPower,
        proof: &QuorumProof,
        epoch: Epoch,
    ) -> SettlementResult<QuorumVerdict> {
        let committed = self.committed_at(epoch)?;
        self.check_quorum(
            &committed.validator_set,
            message,
            key_tag,
            threshold,
            proof,
            "historical",
        )
    }

    /// Verify `proof` against the validator set in force at `timestamp`:
    /// the latest epoch captured at or before it.
    pub fn verify_quorum_sig_at_timestamp(
        &self,
        message: &[u8],
        key_tag: KeyTag,
        threshold: VotingPower,
        proof: &QuorumProof,
        timestamp: Timestamp,
    ) -> SettlementResult<QuorumVerdict> {
        let epoch = self.get_epoch_at(timestamp)?;
        debug!("[settlement] timestamp {} resolves to epoch {}", timestamp, epoch);
        self.verify_quorum_sig_at(message, key_tag, threshold, proof, epoch)
    }

    // =========================================================================
    // CHAIN EVENTS
    // =========================================================================

    /// Apply one decoded chain event to the key and registry checkpoints.
    ///
    /// Header events carry no cache update; the sync loop fetches the header.
    pub fn apply_event(&self, event: &ChainEvent) -> SettlementResult<()> {
        let power = &self.power;
        match event {
            ChainEvent::SetKey {
                operator,
                tag,
                payload,
                timestamp,
            } => self
                .keys
                .record_chain_key(*operator, *tag, payload.clone(), *timestamp)?,
            ChainEvent::RegisterOperator { operator, timestamp } => {
                power.register_operator(*operator, *timestamp)?
            }
            ChainEvent::UnregisterOperator { operator, timestamp } => {
                power.unregister_operator(*operator, *timestamp)?
            }
            ChainEvent::RegisterOperatorVault {
                operator,
                vault,
                timestamp,
            } => power.register_operator_vault(*operator, *vault, *timestamp)?,
            ChainEvent::UnregisterOperatorVault {
                operator,
                vault,
                timestamp,
            } => power.unregister_operator_vault(*operator, *vault, *timestamp)?,
            ChainEvent::RegisterSharedVault { vault, timestamp } => {
                power.register_shared_vault(*vault, *timestamp)?
            }
            ChainEvent::UnregisterSharedVault { vault, timestamp } => {
                power.unregister_shared_vault(*vault, *timestamp)?
            }
            ChainEvent::RegisterToken { token, timestamp } => {
                power.register_token(*token, *timestamp)?
            }
            ChainEvent::UnregisterToken { token, timestamp } => {
                power.unregister_token(*token, *timestamp)?
            }
            ChainEvent::SetSlashingData { data, timestamp } => {
                power.set_slashing_data(*data, *timestamp)?
            }
            ChainEvent::SetGenesis { .. } | ChainEvent::CommitValSetHeader { .. } => {}
        }

        if let Some(timestamp) = event.timestamp() {
            self.last_event_at.fetch_max(timestamp, Ordering::SeqCst);
        }
        EVENTS_APPLIED.with_label_values(&[event.name()]).inc();
        debug!("[settlement] applied {}", event.name());
        Ok(())
    }

    /// Latest membership or key event timestamp applied, `None` if none yet.
    pub fn last_event_timestamp(&self) -> Option<Timestamp> {
        match self.last_event_at.load(Ordering::SeqCst) {
            0 => None,
            ts => Some(ts),
        }
    }

    /// Replace registry membership and keys with the chain's view at
    /// `timestamp`. Idempotent for a given timestamp.
    pub async fn bootstrap_registry(&self, timestamp: Timestamp) -> SettlementResult<()> {
        let chain = self.chain.as_ref();
        let (operators, shared, tokens, slashing, keys) = futures::try_join!(
            chain.get_operators_at(timestamp),
            chain.get_shared_vaults_at(timestamp),
            chain.get_tokens_at(timestamp),
            chain.get_slashing_data_at(timestamp),
            chain.get_keys_at(timestamp),
        )?;

        let mut tracked: BTreeSet<Address> = operators.iter().copied().collect();
        tracked.extend(self.power.tracked_operators());
        let tracked: Vec<Address> = tracked.into_iter().collect();
        let vaults = try_join_all(
            tracked
                .iter()
                .map(|operator| chain.get_operator_vaults_at(*operator, timestamp)),
        )
        .await?;

        let operator_count = operators.len();
        let key_count = keys.len();
        self.power
            .replace_set(Membership::Operators, operators, timestamp)?;
        self.power
            .replace_set(Membership::SharedVaults, shared, timestamp)?;
        self.power.replace_set(Membership::Tokens, tokens, timestamp)?;
        for (operator, vaults) in tracked.into_iter().zip(vaults) {
            self.power
                .replace_set(Membership::OperatorVaults(operator), vaults, timestamp)?;
        }
        self.power.set_slashing_data(slashing, timestamp)?;
        for (operator, key) in keys {
            self.keys
                .record_chain_key(operator, key.tag, key.payload, timestamp)?;
        }
        self.last_event_at.fetch_max(timestamp, Ordering::SeqCst);

        info!(
            "[settlement] registry bootstrapped at {}: {} operators, {} keys",
            timestamp, operator_count, key_count
        );
        Ok(())
    }

    // =========================================================================
    // SUBMISSION
    // =========================================================================

    /// Validate a `setKey` locally, then forward it to `writer`.
    ///
    /// Submissions that would revert on chain never reach the writer.
    pub async fn submit_key<W: SettlementWriter + ?Sized>(
        &self,
        writer: &W,
        operator: Address,
        tag: KeyTag,
        payload: Vec<u8>,
        signature: Vec<u8>,
        extra_data: Vec<u8>,
    ) -> SettlementResult<()> {
        if let Err(e) = self
            .keys
            .validate_set_key(&operator, tag, &payload, &signature, &extra_data)
        {
            warn!(
                "[settlement] setKey for 0x{} not submitted: {}",
                hex::encode(operator),
                e
            );
            return Err(e);
        }
        writer
            .set_key(operator, tag, payload, signature, extra_data)
            .await
    }
}

#[async_trait]
impl<C: ChainClient + ?Sized> SettlementApi for SettlementEngine<C> {
    async fn get_val_set_header(&self) -> SettlementResult<ValSetHeader> {
        SettlementEngine::get_val_set_header(self)
    }

    async fn get_val_set_header_at(&self, epoch: Epoch) -> SettlementResult<ValSetHeader> {
        SettlementEngine::get_val_set_header_at(self, epoch)
    }

    async fn get_extra_data_at(&self, epoch: Epoch, key: Hash) -> SettlementResult<Option<Hash>> {
        SettlementEngine::get_extra_data_at(self, epoch, &key)
    }

    async fn is_val_set_header_committed_at(&self, epoch: Epoch) -> bool {
        SettlementEngine::is_val_set_header_committed_at(self, epoch)
    }

    async fn get_validator_set_at(&self, epoch: Epoch) -> SettlementResult<ValidatorSet> {
        SettlementEngine::get_validator_set_at(self, epoch)
    }

    async fn verify_quorum_sig(
        &self,
        message: &[u8],
        key_tag: KeyTag,
        threshold: VotingPower,
        proof: &QuorumProof,
    ) -> SettlementResult<QuorumVerdict> {
        SettlementEngine::verify_quorum_sig(self, message, key_tag, threshold, proof).await
    }

    async fn verify_quorum_sig_at(
        &self,
        message: &[u8],
        key_tag: KeyTag,
        threshold: VotingPower,
        proof: &QuorumProof,
        epoch: Epoch,
    ) -> SettlementResult<QuorumVerdict> {
        SettlementEngine::verify_quorum_sig_at(self, message, key_tag, threshold, proof, epoch)
    }

    async fn verify_quorum_sig_at_timestamp(
        &self,
        message: &[u8],
        key_tag: KeyTag,
        threshold: VotingPower,
        proof: &QuorumProof,
        timestamp: u64,
    ) -> SettlementResult<QuorumVerdict> {
        SettlementEngine::verify_quorum_sig_at_timestamp(
            self, message, key_tag, threshold, proof, timestamp,
        )
    }

    async fn get_key(&self, operator: Address, tag: KeyTag) -> SettlementResult<Vec<u8>> {
        self.keys.get_key(&operator, tag)
    }

    async fn get_key_at(
        &self,
        operator: Address,
        tag: KeyTag,
        timestamp: u64,
    ) -> SettlementResult<Vec<u8>> {
        self.keys.get_key_at(&operator, tag, timestamp)
    }

    async fn get_operator(&self, payload: &[u8]) -> SettlementResult<Address> {
        self.keys.get_operator(payload)
    }

    async fn get_operator_voting_powers(
        &self,
        operator: Address,
        extra_data: &[u8],
        timestamp: Option<u64>,
    ) -> SettlementResult<Vec<VaultValue>> {
        self.power
            .get_operator_voting_powers(&operator, extra_data, timestamp)
            .await
    }

    async fn state(&self) -> SyncState {
        SettlementEngine::state(self)
    }
}
