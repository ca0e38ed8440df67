use glam::{Quat, Vec3};

use crate::base::KINDA_SMALL_NUMBER;
use crate::ik_goal::IKGoalSpace;
use crate::math::{quat_swing_twist, safe_normalize, yaw_of, Transform};
use crate::op::{impl_op_settings, OpHeader, OpInitContext, OpKind, OpRunContext, RetargetOp};

/// How the body direction used by stride warping is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WarpingDirectionSource {
    /// Best fit rotation of the goal cloud against its reference positions.
    #[default]
    Goals,
    /// Root to tip vector of `direction_chain`.
    Chain,
    /// Rotation of the skeleton root bone.
    RootBone,
}

/// Settings of `StrideWarpOp`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StrideWarpSettings {
    pub direction_source: WarpingDirectionSource,
    /// Forward axis of the character in the reference pose.
    pub forward_direction: Vec3,
    /// Target chain giving the direction when `direction_source` is `Chain`.
    pub direction_chain: String,
    /// Goals to warp. Empty warps every goal of the rig.
    pub goals: Vec<String>,

    /// Scales goal distance along the forward direction.
    pub warp_forwards: f32,
    /// Pushes goals sideways, away from the body.
    pub sideways_offset: f32,
    /// Scales goal distance along the sideways direction.
    pub warp_splay: f32,
}

impl Default for StrideWarpSettings {
    fn default() -> StrideWarpSettings {
        return StrideWarpSettings {
            direction_source: WarpingDirectionSource::Goals,
            forward_direction: Vec3::Y,
            direction_chain: String::new(),
            goals: Vec::new(),
            warp_forwards: 1.0,
            sideways_offset: 0.0,
            warp_splay: 1.0,
        };
    }
}

impl StrideWarpSettings {
    pub fn requires_reinit(&self, other: &StrideWarpSettings) -> bool {
        return self.direction_source != other.direction_source
            || self.direction_chain != other.direction_chain
            || self.goals != other.goals;
    }
}

#[derive(Debug, Clone, PartialEq)]
struct WarpGoal {
    name: String,
    initial_position: Vec3,
}

/// Horizontal frame the goals are warped in.
#[derive(Debug, Clone, Copy, PartialEq)]
struct WarpFrame {
    origin: Vec3,
    forward: Vec3,
    sideways: Vec3,
}

///
/// Warps IK goals along the body's forward and sideways directions, to compensate
/// for stride length and stance width differences between source and target.
///
/// Must be parented to a `RunIKRigOp` and run after the op writing the goals.
///
#[derive(Debug, Clone)]
pub struct StrideWarpOp {
    header: OpHeader,
    settings: StrideWarpSettings,
    goals: Vec<WarpGoal>,
    chain_bones: Option<(usize, usize)>,
    chain_initial: Vec3,
    root_initial: Transform,
}

impl StrideWarpOp {
    pub fn new(name: impl Into<String>, settings: StrideWarpSettings) -> StrideWarpOp {
        return StrideWarpOp {
            header: OpHeader::new(name),
            settings,
            goals: Vec::new(),
            chain_bones: None,
            chain_initial: Vec3::ZERO,
            root_initial: Transform::IDENTITY,
        };
    }

    fn horizontal(v: Vec3) -> Vec3 {
        return Vec3::new(v.x, v.y, 0.0);
    }

    /// Best fit yaw taking the initial goal cloud onto the current one, and the current centroid.
    fn fit_goals(&self, current: &[Vec3]) -> Option<(f32, Vec3)> {
        if current.is_empty() {
            return None;
        }
        let count = current.len() as f32;
        let initial_centroid = self.goals.iter().map(|g| g.initial_position).sum::<Vec3>() / count;
        let current_centroid = current.iter().copied().sum::<Vec3>() / count;

        let mut cross = 0.0;
        let mut dot = 0.0;
        for (goal, position) in self.goals.iter().zip(current.iter()) {
            let a = Self::horizontal(goal.initial_position - initial_centroid);
            let b = Self::horizontal(*position - current_centroid);
            cross += a.x * b.y - a.y * b.x;
            dot += a.dot(b);
        }
        if cross.abs() < KINDA_SMALL_NUMBER && dot.abs() < KINDA_SMALL_NUMBER {
            return Some((0.0, current_centroid));
        }
        return Some((cross.atan2(dot), current_centroid));
    }

    fn warp_frame(&self, ctx: &OpRunContext, current: &[Vec3]) -> Option<WarpFrame> {
        let forward = safe_normalize(Self::horizontal(self.settings.forward_direction))?;
        let (yaw, origin) = match self.settings.direction_source {
            WarpingDirectionSource::Goals => self.fit_goals(current)?,
            WarpingDirectionSource::Chain => {
                let (start, end) = self.chain_bones?;
                let vector = ctx.target_pose[end].translation - ctx.target_pose[start].translation;
                let yaw = yaw_of(vector)? - yaw_of(self.chain_initial)?;
                (yaw, ctx.target_pose[start].translation)
            }
            WarpingDirectionSource::RootBone => {
                let root = ctx.target_pose.first()?;
                let delta = root.rotation * self.root_initial.rotation.inverse();
                let (_, twist) = quat_swing_twist(delta, Vec3::Z);
                let yaw = yaw_of(twist * forward)? - yaw_of(forward)?;
                (yaw, root.translation)
            }
        };
        let forward = Quat::from_rotation_z(yaw) * forward;
        return Some(WarpFrame {
            origin: Self::horizontal(origin),
            forward,
            sideways: forward.cross(Vec3::Z),
        });
    }
}

impl RetargetOp for StrideWarpOp {
    impl_op_settings!(StrideWarp);

    fn kind(&self) -> OpKind {
        return OpKind::StrideWarp;
    }

    fn parent_op_kind(&self) -> Option<OpKind> {
        return Some(OpKind::RunIKRig);
    }

    fn initialize(&mut self, ctx: &mut OpInitContext) -> bool {
        let rig = ctx.effective_target_rig().clone();
        ctx.goals.add_rig_goals(&rig);

        let names: Vec<String> = match self.settings.goals.is_empty() {
            true => rig.goals.iter().map(|g| g.name.clone()).collect(),
            false => self.settings.goals.clone(),
        };
        self.goals.clear();
        for name in names {
            let bone = rig
                .goal(&name)
                .and_then(|goal| ctx.target.find_bone_index_by_name(&goal.bone));
            match bone {
                Some(bone) => self.goals.push(WarpGoal {
                    name,
                    initial_position: ctx.target.retarget_global_pose()[bone].translation,
                }),
                None => {
                    ctx.log.warning(format!(
                        "{}: goal '{}' not found in rig '{}'",
                        self.header.name, name, rig.name
                    ));
                    return false;
                }
            }
        }

        self.chain_bones = None;
        if self.settings.direction_source == WarpingDirectionSource::Chain {
            let chain = ctx.chains.valid_chain(
                crate::base::RetargetSide::Target,
                &rig.name,
                &self.settings.direction_chain,
            );
            let bones = chain.and_then(|c| Some((c.start_bone()?, c.end_bone()?)));
            match bones {
                Some((start, end)) => {
                    let global = ctx.target.retarget_global_pose();
                    self.chain_bones = Some((start, end));
                    self.chain_initial = global[end].translation - global[start].translation;
                }
                None => {
                    ctx.log.warning(format!(
                        "{}: direction chain '{}' not found in rig '{}'",
                        self.header.name, self.settings.direction_chain, rig.name
                    ));
                    return false;
                }
            }
        }

        self.root_initial = match ctx.target.retarget_global_pose().first() {
            Some(root) => *root,
            None => Transform::IDENTITY,
        };
        return true;
    }

    fn run(&mut self, ctx: &mut OpRunContext) {
        let s = &self.settings;
        if s.warp_forwards == 1.0 && s.sideways_offset == 0.0 && s.warp_splay == 1.0 {
            return;
        }

        // only goals already placed in component space are warped
        let current: Vec<Vec3> = self
            .goals
            .iter()
            .map(|g| match ctx.frame.goals.goal(&g.name) {
                Some(goal) if goal.space == IKGoalSpace::Component => goal.position,
                _ => g.initial_position,
            })
            .collect();
        let frame = match self.warp_frame(ctx, &current) {
            Some(frame) => frame,
            None => return,
        };

        for (warp_goal, position) in self.goals.iter().zip(current.iter()) {
            let goal = match ctx.frame.goals.goal_mut(&warp_goal.name) {
                Some(goal) if goal.space == IKGoalSpace::Component => goal,
                _ => continue,
            };
            let offset = Self::horizontal(*position) - frame.origin;
            let forward = frame.forward * offset.dot(frame.forward);
            let sideways = frame.sideways * offset.dot(frame.sideways);
            let side = if offset.dot(frame.sideways) < 0.0 { -1.0 } else { 1.0 };

            let warped = frame.origin
                + forward * s.warp_forwards
                + sideways * s.warp_splay
                + frame.sideways * (side * s.sideways_offset);
            goal.position = Vec3::new(warped.x, warped.y, position.z);
        }
    }
}
