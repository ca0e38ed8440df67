use crate::base::{BoneIndex, KINDA_SMALL_NUMBER};
use crate::hierarchy::BoneHierarchy;
use crate::logger::RetargetLog;
use crate::math::{quat_blend, safe_div, Transform};

/// Named chain definition, as authored on an IK rig.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneChain {
    pub name: String,
    pub start_bone: String,
    pub end_bone: String,
    pub ik_goal: Option<String>,
}

impl BoneChain {
    pub fn new(name: impl Into<String>, start_bone: impl Into<String>, end_bone: impl Into<String>) -> BoneChain {
        return BoneChain {
            name: name.into(),
            start_bone: start_bone.into(),
            end_bone: end_bone.into(),
            ik_goal: None,
        };
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> BoneChain {
        self.ik_goal = Some(goal.into());
        return self;
    }
}

/// Problems found while resolving a chain onto a skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainWarning {
    MissingStartBone,
    MissingEndBone,
    EndNotChildOfStart,
    DegenerateLength,
}

///
/// A chain resolved onto one concrete hierarchy.
///
/// Bone indices run root to tip along a contiguous ancestor path. `params` hold each
/// bone's normalized distance along the chain in the retarget pose, 0 at the root and 1
/// at the tip. An invalid chain keeps its name and warnings but no bones.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBoneChain {
    name: String,
    ik_goal: Option<String>,
    bone_indices: Vec<usize>,
    params: Vec<f32>,
    ref_pose_global: Vec<Transform>,
    ref_pose_local: Vec<Transform>,
    initial_length: f32,
    parent_index: Option<usize>,
    parent_ref_global: Transform,
    warnings: Vec<ChainWarning>,
}

impl ResolvedBoneChain {
    /// Resolves `chain` against the current retarget pose of `hierarchy`.
    /// Failures are logged and leave the chain invalid, they never abort the caller.
    pub fn new(chain: &BoneChain, hierarchy: &BoneHierarchy, log: &mut RetargetLog) -> ResolvedBoneChain {
        let mut resolved = ResolvedBoneChain {
            name: chain.name.clone(),
            ik_goal: chain.ik_goal.clone(),
            bone_indices: Vec::new(),
            params: Vec::new(),
            ref_pose_global: Vec::new(),
            ref_pose_local: Vec::new(),
            initial_length: 0.0,
            parent_index: None,
            parent_ref_global: Transform::IDENTITY,
            warnings: Vec::new(),
        };

        let start = hierarchy.find_bone_index_by_name(&chain.start_bone);
        let end = hierarchy.find_bone_index_by_name(&chain.end_bone);
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            (start, end) => {
                if start.is_none() {
                    resolved.warn(
                        ChainWarning::MissingStartBone,
                        format!("chain '{}' start bone '{}' not found", chain.name, chain.start_bone),
                        log,
                    );
                }
                if end.is_none() {
                    resolved.warn(
                        ChainWarning::MissingEndBone,
                        format!("chain '{}' end bone '{}' not found", chain.name, chain.end_bone),
                        log,
                    );
                }
                return resolved;
            }
        };

        if start != end && !hierarchy.is_parent_of(start, end) {
            resolved.warn(
                ChainWarning::EndNotChildOfStart,
                format!(
                    "chain '{}' end bone '{}' is not a child of start bone '{}'",
                    chain.name, chain.end_bone, chain.start_bone
                ),
                log,
            );
            return resolved;
        }

        let mut indices = vec![end];
        let mut bone = end;
        while bone != start {
            // is_parent_of() guarantees start is on the path.
            bone = match hierarchy.parent_index(bone) {
                Some(parent) => parent,
                None => break,
            };
            indices.push(bone);
        }
        indices.reverse();
        resolved.bone_indices = indices;

        resolved.update_reference(hierarchy, log);
        return resolved;
    }

    /// Recomputes reference transforms, parameters and lengths from the current retarget pose.
    pub fn update_reference(&mut self, hierarchy: &BoneHierarchy, log: &mut RetargetLog) {
        if self.bone_indices.is_empty() {
            return;
        }
        self.warnings.retain(|w| *w != ChainWarning::DegenerateLength);

        let global = hierarchy.retarget_global_pose();
        let local = hierarchy.retarget_local_pose();
        self.ref_pose_global = self.bone_indices.iter().map(|&idx| global[idx]).collect();
        self.ref_pose_local = self.bone_indices.iter().map(|&idx| local[idx]).collect();

        self.parent_index = hierarchy.parent_index(self.bone_indices[0]);
        self.parent_ref_global = match self.parent_index {
            Some(parent) => global[parent],
            None => Transform::IDENTITY,
        };

        if self.bone_indices.len() == 1 {
            self.params = vec![1.0];
            self.initial_length = 0.0;
            return;
        }

        let mut cumulative = Vec::with_capacity(self.bone_indices.len());
        let mut total = 0.0;
        cumulative.push(0.0);
        for pair in self.ref_pose_global.windows(2) {
            total += pair[1].translation.distance(pair[0].translation);
            cumulative.push(total);
        }

        if total < KINDA_SMALL_NUMBER {
            self.warn(
                ChainWarning::DegenerateLength,
                format!("chain '{}' has near zero length, parameters spread by bone count", self.name),
                log,
            );
            let last = (self.bone_indices.len() - 1) as f32;
            self.params = (0..self.bone_indices.len()).map(|i| i as f32 / last).collect();
            self.initial_length = KINDA_SMALL_NUMBER;
            return;
        }

        self.params = cumulative.iter().map(|d| d / total).collect();
        if let Some(last) = self.params.last_mut() {
            *last = 1.0;
        }
        self.initial_length = total;
    }

    fn warn(&mut self, warning: ChainWarning, text: String, log: &mut RetargetLog) {
        self.warnings.push(warning);
        log.warning(text);
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        return !self.bone_indices.is_empty();
    }

    #[inline]
    pub fn name(&self) -> &str {
        return &self.name;
    }

    #[inline]
    pub fn ik_goal(&self) -> Option<&str> {
        return self.ik_goal.as_deref();
    }

    #[inline]
    pub fn bone_indices(&self) -> &[usize] {
        return &self.bone_indices;
    }

    #[inline]
    pub fn num_bones(&self) -> usize {
        return self.bone_indices.len();
    }

    #[inline]
    pub fn start_bone(&self) -> Option<usize> {
        return self.bone_indices.first().copied();
    }

    #[inline]
    pub fn end_bone(&self) -> Option<usize> {
        return self.bone_indices.last().copied();
    }

    #[inline]
    pub fn params(&self) -> &[f32] {
        return &self.params;
    }

    #[inline]
    pub fn ref_pose_global(&self) -> &[Transform] {
        return &self.ref_pose_global;
    }

    #[inline]
    pub fn ref_pose_local(&self) -> &[Transform] {
        return &self.ref_pose_local;
    }

    #[inline]
    pub fn initial_length(&self) -> f32 {
        return self.initial_length;
    }

    #[inline]
    pub fn parent_index(&self) -> Option<usize> {
        return self.parent_index;
    }

    #[inline]
    pub fn parent_ref_global(&self) -> &Transform {
        return &self.parent_ref_global;
    }

    #[inline]
    pub fn warnings(&self) -> &[ChainWarning] {
        return &self.warnings;
    }

    #[inline]
    pub fn contains_bone(&self, bone: impl BoneIndex) -> bool {
        return self.bone_indices.contains(&bone.usize());
    }

    /// Gathers this chain's bones out of a full skeleton pose, root to tip.
    pub fn gather(&self, pose: &[Transform], out: &mut Vec<Transform>) {
        out.clear();
        out.extend(self.bone_indices.iter().map(|&idx| pose[idx]));
    }

    /// Current chain length measured on a full skeleton pose.
    pub fn current_length(&self, pose: &[Transform]) -> f32 {
        return self
            .bone_indices
            .windows(2)
            .map(|pair| pose[pair[1]].translation.distance(pose[pair[0]].translation))
            .sum();
    }

    /// Finds the segment `[lo, hi]` bracketing `param`, and the blend weight inside it.
    fn bracket(&self, param: f32) -> (usize, usize, f32) {
        let last = self.params.len() - 1;
        if self.params.len() == 1 || param <= self.params[0] {
            return (0, 0, 0.0);
        }
        if param >= self.params[last] {
            return (last, last, 0.0);
        }
        for idx in 1..self.params.len() {
            if self.params[idx] >= param {
                let lo = idx - 1;
                let span = self.params[idx] - self.params[lo];
                let alpha = safe_div(param - self.params[lo], span, 0.0);
                return (lo, idx, alpha);
            }
        }
        return (last, last, 0.0);
    }

    /// Transform at `param` along the chain, interpolated between the two bones bracketing it.
    ///
    /// * `transforms` - One transform per chain bone, root to tip.
    ///
    /// Position and scale are lerped, rotation uses a normalized quaternion blend. Params at
    /// or beyond the chain ends return the root/tip transform exactly.
    pub fn transform_at_param(&self, transforms: &[Transform], param: f32) -> Transform {
        if transforms.is_empty() || self.params.is_empty() {
            return Transform::IDENTITY;
        }
        let (lo, hi, alpha) = self.bracket(param);
        if lo == hi || alpha <= 0.0 {
            return transforms[lo];
        }
        if alpha >= 1.0 {
            return transforms[hi];
        }
        let from = &transforms[lo];
        let to = &transforms[hi];
        return Transform {
            translation: from.translation.lerp(to.translation, alpha),
            rotation: quat_blend(from.rotation, to.rotation, alpha),
            scale: from.scale.lerp(to.scale, alpha),
        };
    }

    /// Ratio of current to reference length of the segment ending near `param`.
    ///
    /// * `initial` - Reference transforms, one per chain bone.
    /// * `current` - Current transforms, one per chain bone.
    pub fn stretch_at_param(&self, initial: &[Transform], current: &[Transform], param: f32) -> f32 {
        if self.params.len() < 2 || initial.len() < 2 || current.len() < 2 {
            return 1.0;
        }
        let (_, hi, _) = self.bracket(param);
        let hi = usize::max(hi, 1);
        let lo = hi - 1;
        let initial_len = initial[hi].translation.distance(initial[lo].translation);
        let current_len = current[hi].translation.distance(current[lo].translation);
        return safe_div(current_len, initial_len, 1.0);
    }
}
