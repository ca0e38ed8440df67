use crate::chain::BoneChain;

/// An IK goal declared on a rig, driving `bone` towards a goal transform.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IKGoalDefinition {
    pub name: String,
    pub bone: String,
}

impl IKGoalDefinition {
    pub fn new(name: impl Into<String>, bone: impl Into<String>) -> IKGoalDefinition {
        return IKGoalDefinition {
            name: name.into(),
            bone: bone.into(),
        };
    }
}

///
/// IK rig definition: what the retargeter knows about a rig asset.
///
/// The pelvis bone ("retarget root") receives the root translation delta of retarget
/// poses and drives pelvis motion. Chains are the unit of FK/IK retargeting; a chain
/// naming a goal is retargeted by IK.
///
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IKRigDefinition {
    pub name: String,
    pub pelvis: String,
    pub chains: Vec<BoneChain>,
    pub goals: Vec<IKGoalDefinition>,
}

impl IKRigDefinition {
    pub fn new(name: impl Into<String>, pelvis: impl Into<String>) -> IKRigDefinition {
        return IKRigDefinition {
            name: name.into(),
            pelvis: pelvis.into(),
            chains: Vec::new(),
            goals: Vec::new(),
        };
    }

    pub fn with_chain(mut self, chain: BoneChain) -> IKRigDefinition {
        self.chains.push(chain);
        return self;
    }

    pub fn with_goal(mut self, goal: IKGoalDefinition) -> IKRigDefinition {
        self.goals.push(goal);
        return self;
    }

    #[inline]
    pub fn chain(&self, name: &str) -> Option<&BoneChain> {
        return self.chains.iter().find(|c| c.name == name);
    }

    #[inline]
    pub fn goal(&self, name: &str) -> Option<&IKGoalDefinition> {
        return self.goals.iter().find(|g| g.name == name);
    }

    /// Goal of the chain named `chain`, if the chain declares one and the goal exists.
    pub fn goal_of_chain(&self, chain: &str) -> Option<&IKGoalDefinition> {
        let goal = self.chain(chain)?.ik_goal.as_deref()?;
        return self.goal(goal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let rig = IKRigDefinition::new("Mannequin", "pelvis")
            .with_chain(BoneChain::new("LeftLeg", "thigh_l", "foot_l").with_goal("LeftFootIK"))
            .with_chain(BoneChain::new("Spine", "spine", "spine_02"))
            .with_goal(IKGoalDefinition::new("LeftFootIK", "foot_l"));

        assert_eq!(rig.chain("Spine").unwrap().end_bone, "spine_02");
        assert!(rig.chain("RightLeg").is_none());
        assert_eq!(rig.goal_of_chain("LeftLeg").unwrap().bone, "foot_l");
        assert!(rig.goal_of_chain("Spine").is_none());
    }
}
