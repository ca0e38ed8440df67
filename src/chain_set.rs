use std::sync::Arc;

use crate::base::RetargetSide;
use crate::chain::{BoneChain, ResolvedBoneChain};
use crate::hierarchy::BoneHierarchy;
use crate::logger::RetargetLog;
use crate::rig::IKRigDefinition;

/// How `ChainMapping::auto_map` pairs target chains with source chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AutoMapChainType {
    /// Same name, ignoring case.
    #[default]
    Exact,
    /// Closest name by normalized edit distance.
    Fuzzy,
    /// Unmap everything.
    Clear,
}

/// One target chain and the source chain it reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainPair {
    pub target_chain: String,
    pub source_chain: Option<String>,
}

///
/// Per-op table pairing target chains with source chains.
///
/// Unmapped target chains are simply skipped by the op owning the mapping.
///
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainMapping {
    pairs: Vec<ChainPair>,
}

impl ChainMapping {
    pub fn new() -> ChainMapping {
        return ChainMapping::default();
    }

    /// Builds a mapping from explicit `(target, source)` name pairs.
    pub fn from_pairs<'t>(pairs: impl IntoIterator<Item = (&'t str, &'t str)>) -> ChainMapping {
        return ChainMapping {
            pairs: pairs
                .into_iter()
                .map(|(target, source)| ChainPair {
                    target_chain: target.to_string(),
                    source_chain: Some(source.to_string()),
                })
                .collect(),
        };
    }

    /// Builds a mapping by auto mapping every target chain.
    pub fn auto(source: &[BoneChain], target: &[BoneChain], mode: AutoMapChainType) -> ChainMapping {
        let mut mapping = ChainMapping::new();
        mapping.auto_map(source, target, mode, true);
        return mapping;
    }

    #[inline]
    pub fn pairs(&self) -> &[ChainPair] {
        return &self.pairs;
    }

    /// Pairs whose source side is set.
    pub fn mapped_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        return self
            .pairs
            .iter()
            .filter_map(|p| p.source_chain.as_deref().map(|s| (p.target_chain.as_str(), s)));
    }

    #[inline]
    pub fn source_chain(&self, target_chain: &str) -> Option<&str> {
        return self
            .pairs
            .iter()
            .find(|p| p.target_chain == target_chain)
            .and_then(|p| p.source_chain.as_deref());
    }

    pub fn set_source_chain(&mut self, target_chain: &str, source_chain: Option<&str>) {
        let source_chain = source_chain.map(|s| s.to_string());
        match self.pairs.iter_mut().find(|p| p.target_chain == target_chain) {
            Some(pair) => pair.source_chain = source_chain,
            None => self.pairs.push(ChainPair {
                target_chain: target_chain.to_string(),
                source_chain,
            }),
        }
    }

    /// Re-syncs the target side with `target`, then maps every chain by `mode`.
    ///
    /// * `force_remap` - When false, already mapped target chains keep their source.
    pub fn auto_map(&mut self, source: &[BoneChain], target: &[BoneChain], mode: AutoMapChainType, force_remap: bool) {
        let old = std::mem::take(&mut self.pairs);
        for chain in target {
            let previous = old
                .iter()
                .find(|p| p.target_chain == chain.name)
                .and_then(|p| p.source_chain.clone())
                .filter(|s| source.iter().any(|c| &c.name == s));
            let source_chain = if previous.is_some() && !force_remap {
                previous
            } else {
                match mode {
                    AutoMapChainType::Clear => None,
                    AutoMapChainType::Exact => source
                        .iter()
                        .find(|c| c.name.eq_ignore_ascii_case(&chain.name))
                        .map(|c| c.name.clone()),
                    AutoMapChainType::Fuzzy => fuzzy_match(&chain.name, source),
                }
            };
            self.pairs.push(ChainPair {
                target_chain: chain.name.clone(),
                source_chain,
            });
        }
    }
}

fn fuzzy_match(name: &str, candidates: &[BoneChain]) -> Option<String> {
    let name = name.to_lowercase();
    let mut best: Option<(f32, &BoneChain)> = None;
    for candidate in candidates {
        let other = candidate.name.to_lowercase();
        let longest = usize::max(name.chars().count(), other.chars().count()).max(1);
        let score = 1.0 - edit_distance(&name, &other) as f32 / longest as f32;
        if best.map(|(s, _)| score > s).unwrap_or(true) {
            best = Some((score, candidate));
        }
    }
    return best.filter(|(score, _)| *score > 0.0).map(|(_, c)| c.name.clone());
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diag
            } else {
                1 + usize::min(diag, usize::min(above, row[j]))
            };
            diag = above;
        }
    }
    return row[b.len()];
}

/// Chains of one rig resolved onto one side's hierarchy.
#[derive(Debug, Clone)]
pub struct RigChains {
    pub side: RetargetSide,
    pub rig: Arc<IKRigDefinition>,
    pub chains: Vec<ResolvedBoneChain>,
}

///
/// Every chain of every rig referenced by the op stack, resolved on the matching side.
///
#[derive(Debug, Clone, Default)]
pub struct RetargetChainSet {
    rigs: Vec<RigChains>,
}

impl RetargetChainSet {
    pub fn new() -> RetargetChainSet {
        return RetargetChainSet::default();
    }

    /// Resolves the chains of `rig` onto `hierarchy`, unless that rig was already added on `side`.
    pub fn add_rig(
        &mut self,
        side: RetargetSide,
        rig: &Arc<IKRigDefinition>,
        hierarchy: &BoneHierarchy,
        log: &mut RetargetLog,
    ) {
        if self.rig(side, &rig.name).is_some() {
            return;
        }
        let chains = rig
            .chains
            .iter()
            .map(|chain| ResolvedBoneChain::new(chain, hierarchy, log))
            .collect();
        self.rigs.push(RigChains {
            side,
            rig: rig.clone(),
            chains,
        });
    }

    /// Recomputes reference data of every chain on `side` after a retarget pose change.
    pub fn update_reference(&mut self, side: RetargetSide, hierarchy: &BoneHierarchy, log: &mut RetargetLog) {
        for rig in self.rigs.iter_mut().filter(|r| r.side == side) {
            for chain in rig.chains.iter_mut() {
                chain.update_reference(hierarchy, log);
            }
        }
    }

    pub fn clear(&mut self) {
        self.rigs.clear();
    }

    #[inline]
    pub fn rigs(&self) -> &[RigChains] {
        return &self.rigs;
    }

    #[inline]
    pub fn rig(&self, side: RetargetSide, rig_name: &str) -> Option<&RigChains> {
        return self.rigs.iter().find(|r| r.side == side && r.rig.name == rig_name);
    }

    /// Looks up a chain by name. Invalid chains are returned too, check `is_valid()`.
    pub fn chain(&self, side: RetargetSide, rig_name: &str, chain_name: &str) -> Option<&ResolvedBoneChain> {
        return self.rig(side, rig_name)?.chains.iter().find(|c| c.name() == chain_name);
    }

    /// Looks up a valid chain by name.
    pub fn valid_chain(&self, side: RetargetSide, rig_name: &str, chain_name: &str) -> Option<&ResolvedBoneChain> {
        return self.chain(side, rig_name, chain_name).filter(|c| c.is_valid());
    }
}
