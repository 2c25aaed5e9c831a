//! # Voting Power Aggregator
//!
//! Converts per-vault stake into voting power and sums it per operator.
//!
//! ## Pipeline
//!
//! ```text
//! operator ──→ vaults at τ (shared ∪ operator-specific)
//!          ──→ eligible vaults (collateral token registered, slashing rules met)
//!          ──→ stake per vault (parallel chain reads)
//!          ──→ curve(vault)(stake) ──→ [VaultValue]
//! ```
//!
//! Registry membership (operators, vaults, tokens, slashing flag) is
//! checkpointed locally from chain events; only stakes and vault metadata
//! are read from the chain.

use futures::future::try_join_all;
use primitive_types::U256;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use super::checkpoint_store::CheckpointStore;
use super::key_resolver::KeyResolver;
use crate::domain::{
    Address, OperatorVotingPower, SettlementError, SettlementResult, SlashingData, Timestamp,
    Validator, ValidatorSet, VaultInfo, VaultValue, VotingPower,
};
use crate::ports::StakeReader;

// =============================================================================
// STAKE-TO-POWER CURVES
// =============================================================================

/// Monotonic, non-negative conversion from stake to voting power.
pub trait StakeToPower: Send + Sync + fmt::Debug {
    /// Voting power for `stake`; `extra_data` parameterizes custom curves.
    fn convert(&self, stake: U256, extra_data: &[u8], timestamp: Option<Timestamp>) -> VotingPower;
}

/// Built-in curves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerCurve {
    /// Power equals stake.
    Identity,
    /// `stake * num / den` (zero when `den` is zero).
    Linear {
        /// Numerator
        num: U256,
        /// Denominator
        den: U256,
    },
    /// `min(stake, cap)`.
    Capped {
        /// Maximum power per vault
        cap: U256,
    },
    /// Stake reduced by `bps` basis points.
    Discounted {
        /// Discount in basis points (capped at 10 000)
        bps: u16,
    },
}

impl StakeToPower for PowerCurve {
    fn convert(&self, stake: U256, _extra_data: &[u8], _timestamp: Option<Timestamp>) -> VotingPower {
        match *self {
            PowerCurve::Identity => stake,
            PowerCurve::Linear { num, den } => {
                if den.is_zero() {
                    U256::zero()
                } else {
                    stake.saturating_mul(num) / den
                }
            }
            PowerCurve::Capped { cap } => stake.min(cap),
            PowerCurve::Discounted { bps } => {
                let keep = 10_000u64.saturating_sub(u64::from(bps));
                stake.saturating_mul(U256::from(keep)) / U256::from(10_000u64)
            }
        }
    }
}

/// Curve per vault with a fallback.
#[derive(Clone, Debug)]
pub struct PowerCurves {
    default: Arc<dyn StakeToPower>,
    per_vault: HashMap<Address, Arc<dyn StakeToPower>>,
}

impl Default for PowerCurves {
    fn default() -> Self {
        Self::new(Arc::new(PowerCurve::Identity))
    }
}

impl PowerCurves {
    /// Registry falling back to `default`.
    pub fn new(default: Arc<dyn StakeToPower>) -> Self {
        Self {
            default,
            per_vault: HashMap::new(),
        }
    }

    /// Override the curve for one vault.
    pub fn set(&mut self, vault: Address, curve: Arc<dyn StakeToPower>) {
        self.per_vault.insert(vault, curve);
    }

    /// Curve used for `vault`.
    pub fn get(&self, vault: &Address) -> &Arc<dyn StakeToPower> {
        self.per_vault.get(vault).unwrap_or(&self.default)
    }
}

// =============================================================================
// REGISTRY MEMBERSHIP
// =============================================================================

/// Checkpointed membership set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Membership {
    /// Registered operators.
    Operators,
    /// Vaults shared by every operator.
    SharedVaults,
    /// Collateral tokens.
    Tokens,
    /// Vaults of one operator.
    OperatorVaults(Address),
}

type AddressSet = Arc<BTreeSet<Address>>;

/// Per-batch cache of vault metadata.
#[derive(Debug, Default)]
struct BatchCache {
    vault_info: HashMap<Address, VaultInfo>,
}

/// Voting power aggregator over a stake reader.
pub struct VotingPowerAggregator<S: StakeReader + ?Sized> {
    stakes: Arc<S>,
    curves: PowerCurves,
    include_zero_power: bool,
    sets: CheckpointStore<Membership, AddressSet>,
    slashing: CheckpointStore<(), SlashingData>,
}

impl<S: StakeReader + ?Sized> VotingPowerAggregator<S> {
    /// New aggregator with empty membership.
    pub fn new(stakes: Arc<S>, curves: PowerCurves, include_zero_power: bool) -> Self {
        Self {
            stakes,
            curves,
            include_zero_power,
            sets: CheckpointStore::new(),
            slashing: CheckpointStore::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Membership ingestion
    // -------------------------------------------------------------------------

    fn add(&self, set: Membership, member: Address, at: Timestamp) -> SettlementResult<()> {
        self.sets.update(set, at, |prev| {
            let mut next = prev.map(|s| s.as_ref().clone()).unwrap_or_default();
            next.insert(member);
            Arc::new(next)
        })
    }

    fn remove(&self, set: Membership, member: Address, at: Timestamp) -> SettlementResult<()> {
        self.sets.update(set, at, |prev| {
            let mut next = prev.map(|s| s.as_ref().clone()).unwrap_or_default();
            next.remove(&member);
            Arc::new(next)
        })
    }

    /// Replace a whole set (full resync).
    pub fn replace_set(
        &self,
        set: Membership,
        members: impl IntoIterator<Item = Address>,
        at: Timestamp,
    ) -> SettlementResult<()> {
        let members: BTreeSet<Address> = members.into_iter().collect();
        self.sets.update(set, at, |_| Arc::new(members))
    }

    /// Operators that have an operator-vault history.
    pub fn tracked_operators(&self) -> Vec<Address> {
        self.sets
            .keys()
            .into_iter()
            .filter_map(|set| match set {
                Membership::OperatorVaults(operator) => Some(operator),
                _ => None,
            })
            .collect()
    }

    /// Operator registered at `at`.
    pub fn register_operator(&self, operator: Address, at: Timestamp) -> SettlementResult<()> {
        self.add(Membership::Operators, operator, at)
    }

    /// Operator unregistered at `at`.
    pub fn unregister_operator(&self, operator: Address, at: Timestamp) -> SettlementResult<()> {
        self.remove(Membership::Operators, operator, at)
    }

    /// Vault registered for `operator` at `at`.
    pub fn register_operator_vault(
        &self,
        operator: Address,
        vault: Address,
        at: Timestamp,
    ) -> SettlementResult<()> {
        self.add(Membership::OperatorVaults(operator), vault, at)
    }

    /// Operator vault unregistered at `at`.
    pub fn unregister_operator_vault(
        &self,
        operator: Address,
        vault: Address,
        at: Timestamp,
    ) -> SettlementResult<()> {
        self.remove(Membership::OperatorVaults(operator), vault, at)
    }

    /// Shared vault registered at `at`.
    pub fn register_shared_vault(&self, vault: Address, at: Timestamp) -> SettlementResult<()> {
        self.add(Membership::SharedVaults, vault, at)
    }

    /// Shared vault unregistered at `at`.
    pub fn unregister_shared_vault(&self, vault: Address, at: Timestamp) -> SettlementResult<()> {
        self.remove(Membership::SharedVaults, vault, at)
    }

    /// Collateral token registered at `at`.
    pub fn register_token(&self, token: Address, at: Timestamp) -> SettlementResult<()> {
        self.add(Membership::Tokens, token, at)
    }

    /// Collateral token unregistered at `at`.
    pub fn unregister_token(&self, token: Address, at: Timestamp) -> SettlementResult<()> {
        self.remove(Membership::Tokens, token, at)
    }

    /// Slashing requirements changed at `at`.
    pub fn set_slashing_data(&self, data: SlashingData, at: Timestamp) -> SettlementResult<()> {
        self.slashing.update((), at, |_| data)
    }

    /// Drop membership changes at or after `at`.
    pub fn truncate_from(&self, at: Timestamp) -> usize {
        self.sets.truncate_all_from(at) + self.slashing.truncate_all_from(at)
    }

    // -------------------------------------------------------------------------
    // Membership reads
    // -------------------------------------------------------------------------

    /// Members of `set` as of `at` (`None` = latest). Empty before the first change.
    pub fn members_at(&self, set: &Membership, at: Option<Timestamp>) -> AddressSet {
        let result = match at {
            Some(ts) => self.sets.query(set, ts, None),
            None => self.sets.query_latest(set),
        };
        result.unwrap_or_default()
    }

    /// Whether `operator` is currently registered.
    pub fn is_operator_registered(&self, operator: &Address) -> bool {
        self.members_at(&Membership::Operators, None).contains(operator)
    }

    /// Whether `operator` was registered at `timestamp`.
    pub fn is_operator_registered_at(&self, operator: &Address, timestamp: Timestamp) -> bool {
        self.members_at(&Membership::Operators, Some(timestamp))
            .contains(operator)
    }

    /// Registered operators.
    pub fn get_operators_at(&self, timestamp: Option<Timestamp>) -> Vec<Address> {
        self.members_at(&Membership::Operators, timestamp)
            .iter()
            .copied()
            .collect()
    }

    /// Vaults registered for `operator`.
    pub fn get_operator_vaults_at(
        &self,
        operator: &Address,
        timestamp: Option<Timestamp>,
    ) -> Vec<Address> {
        self.members_at(&Membership::OperatorVaults(*operator), timestamp)
            .iter()
            .copied()
            .collect()
    }

    /// Shared vaults.
    pub fn get_shared_vaults_at(&self, timestamp: Option<Timestamp>) -> Vec<Address> {
        self.members_at(&Membership::SharedVaults, timestamp)
            .iter()
            .copied()
            .collect()
    }

    /// Collateral tokens.
    pub fn get_tokens_at(&self, timestamp: Option<Timestamp>) -> Vec<Address> {
        self.members_at(&Membership::Tokens, timestamp)
            .iter()
            .copied()
            .collect()
    }

    /// Slashing requirements (defaults before the first change).
    pub fn get_slashing_data_at(&self, timestamp: Option<Timestamp>) -> SlashingData {
        let result = match timestamp {
            Some(ts) => self.slashing.query(&(), ts, None),
            None => self.slashing.query_latest(&()),
        };
        result.unwrap_or_default()
    }

    /// Whether `vault` is currently registered to any operator.
    pub fn is_operator_vault_registered(&self, vault: &Address) -> bool {
        let snapshot = self.sets.snapshot();
        let found = snapshot.keys().any(|set| {
            matches!(set, Membership::OperatorVaults(_))
                && snapshot
                    .query_latest(set)
                    .map_or(false, |members| members.contains(vault))
        });
        found
    }

    /// Whether `vault` is currently registered to `operator`.
    pub fn is_operator_vault_registered_for(&self, operator: &Address, vault: &Address) -> bool {
        self.members_at(&Membership::OperatorVaults(*operator), None)
            .contains(vault)
    }

    /// Whether `vault` is currently a shared vault.
    pub fn is_shared_vault_registered(&self, vault: &Address) -> bool {
        self.members_at(&Membership::SharedVaults, None).contains(vault)
    }

    // -------------------------------------------------------------------------
    // Aggregation
    // -------------------------------------------------------------------------

    /// Apply the vault's curve.
    pub fn stake_to_voting_power(
        &self,
        vault: &Address,
        stake: U256,
        extra_data: &[u8],
        timestamp: Option<Timestamp>,
    ) -> VotingPower {
        self.curves.get(vault).convert(stake, extra_data, timestamp)
    }

    /// Shared plus operator vaults, deduplicated, in address order.
    fn vaults_of(&self, operator: &Address, timestamp: Option<Timestamp>) -> Vec<Address> {
        let mut vaults: BTreeSet<Address> = self
            .members_at(&Membership::SharedVaults, timestamp)
            .iter()
            .copied()
            .collect();
        vaults.extend(
            self.members_at(&Membership::OperatorVaults(*operator), timestamp)
                .iter()
                .copied(),
        );
        vaults.into_iter().collect()
    }

    async fn fill_vault_info(&self, vaults: &BTreeSet<Address>, cache: &mut BatchCache) -> SettlementResult<()> {
        let missing: Vec<Address> = vaults
            .iter()
            .filter(|v| !cache.vault_info.contains_key(*v))
            .copied()
            .collect();
        let infos = try_join_all(missing.iter().map(|v| self.stakes.get_vault_info(*v))).await?;
        cache.vault_info.extend(missing.into_iter().zip(infos));
        Ok(())
    }

    async fn operator_powers(
        &self,
        operator: Address,
        extra_data: &[u8],
        timestamp: Option<Timestamp>,
        cache: &BatchCache,
    ) -> SettlementResult<Vec<VaultValue>> {
        let tokens = self.members_at(&Membership::Tokens, timestamp);
        let slashing = self.get_slashing_data_at(timestamp);

        let eligible: Vec<Address> = self
            .vaults_of(&operator, timestamp)
            .into_iter()
            .filter(|vault| match cache.vault_info.get(vault) {
                Some(info) => tokens.contains(&info.collateral) && slashing.admits(info),
                None => false,
            })
            .collect();

        let stakes = try_join_all(
            eligible
                .iter()
                .map(|vault| self.stakes.get_operator_stake_at(*vault, operator, timestamp)),
        )
        .await?;

        let values = eligible
            .into_iter()
            .zip(stakes)
            .map(|(vault, stake)| VaultValue {
                vault,
                value: self.stake_to_voting_power(&vault, stake, extra_data, timestamp),
            })
            .filter(|v| self.include_zero_power || !v.value.is_zero())
            .collect();
        Ok(values)
    }

    /// Per-vault voting power of `operator` (`None` = latest).
    pub async fn get_operator_voting_powers(
        &self,
        operator: &Address,
        extra_data: &[u8],
        timestamp: Option<Timestamp>,
    ) -> SettlementResult<Vec<VaultValue>> {
        let vaults: BTreeSet<Address> = self.vaults_of(operator, timestamp).into_iter().collect();
        let mut cache = BatchCache::default();
        self.fill_vault_info(&vaults, &mut cache).await?;
        self.operator_powers(*operator, extra_data, timestamp, &cache)
            .await
    }

    /// Voting power of every registered operator.
    ///
    /// `extra_data` overrides the curve parameters per operator; operators
    /// not listed use empty extra data. Vault metadata is fetched once per
    /// vault for the whole batch.
    pub async fn get_voting_powers(
        &self,
        extra_data: &[(Address, Vec<u8>)],
        timestamp: Option<Timestamp>,
    ) -> SettlementResult<Vec<OperatorVotingPower>> {
        let operators = self.get_operators_at(timestamp);
        let overrides: HashMap<&Address, &[u8]> = extra_data
            .iter()
            .map(|(op, data)| (op, data.as_slice()))
            .collect();

        let mut all_vaults = BTreeSet::new();
        for operator in &operators {
            all_vaults.extend(self.vaults_of(operator, timestamp));
        }
        let mut cache = BatchCache::default();
        self.fill_vault_info(&all_vaults, &mut cache).await?;

        let cache = &cache;
        let powers = try_join_all(operators.iter().map(|operator| {
            let data = overrides.get(operator).copied().unwrap_or(&[]);
            async move {
                let vaults = self.operator_powers(*operator, data, timestamp, cache).await?;
                Ok::<_, SettlementError>(OperatorVotingPower {
                    operator: *operator,
                    vaults,
                })
            }
        }))
        .await?;

        tracing::debug!(
            "[settlement] aggregated voting power for {} operators over {} vaults",
            operators.len(),
            all_vaults.len()
        );
        Ok(powers)
    }

    /// Validator set as of `timestamp` (`None` = live): operators with power
    /// (or all, with `include_zero_power`) and their keys at that time.
    pub async fn derive_validator_set(
        &self,
        keys: &KeyResolver,
        timestamp: Option<Timestamp>,
    ) -> SettlementResult<ValidatorSet> {
        let powers = self.get_voting_powers(&[], timestamp).await?;
        let validators = powers
            .into_iter()
            .map(|p| (p.operator, p.total()))
            .filter(|(_, power)| self.include_zero_power || !power.is_zero())
            .map(|(operator, voting_power)| Validator {
                operator,
                voting_power,
                keys: match timestamp {
                    Some(ts) => keys.get_keys_at(&operator, ts),
                    None => keys.get_keys(&operator),
                },
            })
            .collect();
        Ok(ValidatorSet::new(validators))
    }
}
