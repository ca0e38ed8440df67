//!
//! Base types, traits and utils.
//!

use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::BuildHasher;
use thiserror::Error;

/// Retarget error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetargetError {
    /// Lock poisoned, only happens when reading debug snapshots.
    #[error("Lock poisoned")]
    LockPoison,
    /// Invalid bone index.
    #[error("Invalid index")]
    InvalidIndex,
    /// Bone names, parents and rest poses do not describe a valid depth-first hierarchy.
    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    /// Processor initialized without a source skeleton.
    #[error("Missing source skeleton")]
    MissingSourceSkeleton,
    /// Processor initialized without a target skeleton.
    #[error("Missing target skeleton")]
    MissingTargetSkeleton,
    /// Processor initialized without a retarget asset.
    #[error("Missing retarget asset")]
    MissingAsset,
    /// Processor initialized without an IK rig on one side.
    #[error("Missing IK rig")]
    MissingRig,

    /// A bone referenced by name was not found.
    #[error("Missing bone: {0}")]
    MissingBone(String),
    /// A chain referenced by name was not found or is invalid.
    #[error("Missing chain: {0}")]
    MissingChain(String),
    /// An IK goal referenced by name was not found.
    #[error("Missing goal: {0}")]
    MissingGoal(String),
    /// A retarget pose referenced by name was not found.
    #[error("Missing pose: {0}")]
    MissingPose(String),

    /// An op is parented to a missing op, or to an op of the wrong kind.
    #[error("Invalid parent op: {0}")]
    InvalidParentOp(String),
    /// Settings blob kind does not match the op kind.
    #[error("Settings mismatch: {0}")]
    SettingsMismatch(String),
}

impl RetargetError {
    pub fn is_lock_poison(&self) -> bool {
        matches!(self, RetargetError::LockPoison)
    }

    pub fn is_invalid_index(&self) -> bool {
        matches!(self, RetargetError::InvalidIndex)
    }

    pub fn is_invalid_hierarchy(&self) -> bool {
        matches!(self, RetargetError::InvalidHierarchy(_))
    }

    /// Missing skeletons or asset. These keep the processor from initializing at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RetargetError::MissingSourceSkeleton | RetargetError::MissingTargetSkeleton | RetargetError::MissingAsset
        )
    }

    /// Missing bones, chains, goals, rigs or parents. These only disable the op that hit them.
    pub fn is_op_local(&self) -> bool {
        matches!(
            self,
            RetargetError::MissingBone(_)
                | RetargetError::MissingChain(_)
                | RetargetError::MissingGoal(_)
                | RetargetError::MissingRig
                | RetargetError::InvalidParentOp(_)
        )
    }

    pub fn is_invalid_parent_op(&self) -> bool {
        matches!(self, RetargetError::InvalidParentOp(_))
    }

    pub fn is_settings_mismatch(&self) -> bool {
        matches!(self, RetargetError::SettingsMismatch(_))
    }
}

/// Defines the index of the parent of the root bone (which has no parent in fact).
pub const NO_PARENT: i32 = -1;

/// Defines the maximum number of bones a skeleton may carry.
pub const SKELETON_MAX_BONES: usize = 65535;

/// Lengths below this are treated as degenerate.
pub const KINDA_SMALL_NUMBER: f32 = 1e-4;

/// Divisors below this are replaced before dividing.
pub const SMALL_NUMBER: f32 = 1e-8;

/// Which skeleton of the retargeter something belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RetargetSide {
    Source,
    Target,
}

impl RetargetSide {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        return match self {
            RetargetSide::Source => "source",
            RetargetSide::Target => "target",
        };
    }
}

/// A hasher builder that creates `DefaultHasher` with default keys.
///
/// Keeps map iteration order stable across runs, so that ops touching the goal container
/// or the pose map behave the same on every machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicState;

impl DeterministicState {
    /// Creates a new `DeterministicState` that builds `DefaultHasher` with default keys.
    pub const fn new() -> DeterministicState {
        DeterministicState
    }
}

impl BuildHasher for DeterministicState {
    type Hasher = DefaultHasher;

    fn build_hasher(&self) -> DefaultHasher {
        DefaultHasher::default()
    }
}

/// `HashMap` keyed with `DeterministicState`.
pub type DeterministicMap<K, V> = std::collections::HashMap<K, V, DeterministicState>;

/// Creates an empty `DeterministicMap`.
#[inline]
pub fn deterministic_map<K, V>() -> DeterministicMap<K, V> {
    return DeterministicMap::with_hasher(DeterministicState::new());
}

/// Allow usize/i32/i16 use as bone index.
pub trait BoneIndex {
    fn usize(&self) -> usize;
    fn i32(&self) -> i32;
}

macro_rules! bone_index {
    ($type:ty) => {
        impl BoneIndex for $type {
            #[inline(always)]
            fn usize(&self) -> usize {
                *self as usize
            }

            #[inline(always)]
            fn i32(&self) -> i32 {
                *self as i32
            }
        }
    };
}

bone_index!(usize);
bone_index!(i32);
bone_index!(i16);
