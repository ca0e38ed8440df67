use bimap::BiHashMap;

use crate::base::{BoneIndex, RetargetError, NO_PARENT, SKELETON_MAX_BONES};
use crate::math::Transform;

///
/// Skeleton input of the retargeter: bone names, parent hierarchy and reference pose.
///
/// Bones are stored in depth-first order: every bone's parent index is smaller than its
/// own index, and every subtree occupies a contiguous index range. Hierarchy is packed as
/// an array of parent indices, `NO_PARENT` (-1) for roots. Reference poses are local
/// (parent space) transforms.
///
/// The hierarchy is immutable once built, which allows the per-bone "last descendant"
/// table to be computed once here and shared by everything that walks a subtree.
///
#[derive(Debug, Clone)]
pub struct Skeleton {
    bone_names: BiHashMap<String, usize>,
    bone_parents: Vec<i32>,
    bone_ref_poses: Vec<Transform>,
    last_descendants: Vec<usize>,
}

impl Skeleton {
    /// Builds a skeleton from parallel arrays of names, parents and local reference poses.
    pub fn new(
        names: Vec<String>,
        parents: Vec<i32>,
        ref_poses: Vec<Transform>,
    ) -> Result<Skeleton, RetargetError> {
        if names.len() != parents.len() || names.len() != ref_poses.len() {
            return Err(RetargetError::InvalidHierarchy(format!(
                "length mismatch: {} names, {} parents, {} poses",
                names.len(),
                parents.len(),
                ref_poses.len()
            )));
        }
        if names.len() > SKELETON_MAX_BONES {
            return Err(RetargetError::InvalidHierarchy(format!("too many bones: {}", names.len())));
        }

        let mut bone_names = BiHashMap::with_capacity(names.len());
        for (idx, name) in names.into_iter().enumerate() {
            if bone_names.contains_left(&name) {
                return Err(RetargetError::InvalidHierarchy(format!("duplicated bone name: {}", name)));
            }
            bone_names.insert(name, idx);
        }

        // Depth-first check: the parent of a bone must be on the current ancestor stack.
        let mut stack: Vec<usize> = Vec::new();
        for (idx, &parent) in parents.iter().enumerate() {
            if parent == NO_PARENT {
                stack.clear();
            } else {
                if parent < 0 || parent as usize >= idx {
                    return Err(RetargetError::InvalidHierarchy(format!(
                        "bone {} has invalid parent {}",
                        idx, parent
                    )));
                }
                while let Some(&top) = stack.last() {
                    if top == parent as usize {
                        break;
                    }
                    stack.pop();
                }
                if stack.is_empty() {
                    return Err(RetargetError::InvalidHierarchy(format!(
                        "bone {} is not stored in depth-first order",
                        idx
                    )));
                }
            }
            stack.push(idx);
        }

        let mut last_descendants: Vec<usize> = (0..parents.len()).collect();
        for idx in (0..parents.len()).rev() {
            let parent = parents[idx];
            if parent != NO_PARENT {
                let parent = parent as usize;
                last_descendants[parent] = usize::max(last_descendants[parent], last_descendants[idx]);
            }
        }

        return Ok(Skeleton {
            bone_names,
            bone_parents: parents,
            bone_ref_poses: ref_poses,
            last_descendants,
        });
    }

    /// Gets the number of bones of `Skeleton`.
    #[inline]
    pub fn num_bones(&self) -> usize {
        return self.bone_parents.len();
    }

    /// Gets bone's reference poses, in local space.
    #[inline]
    pub fn bone_ref_poses(&self) -> &[Transform] {
        return &self.bone_ref_poses;
    }

    /// Gets bone's parent indices range.
    #[inline]
    pub fn bone_parents(&self) -> &[i32] {
        return &self.bone_parents;
    }

    /// Gets bone's parent by index, `NO_PARENT` for roots.
    #[inline]
    pub fn bone_parent(&self, idx: impl BoneIndex) -> i32 {
        return self.bone_parents[idx.usize()];
    }

    /// Gets bone's parent by index as an `Option`.
    #[inline]
    pub fn parent_of(&self, idx: impl BoneIndex) -> Option<usize> {
        let parent = self.bone_parents[idx.usize()];
        if parent == NO_PARENT {
            return None;
        }
        return Some(parent as usize);
    }

    /// Gets bone's name map.
    #[inline]
    pub fn bone_names(&self) -> &BiHashMap<String, usize> {
        return &self.bone_names;
    }

    /// Gets bone's name by index.
    #[inline]
    pub fn bone_name(&self, idx: impl BoneIndex) -> Option<&str> {
        return self.bone_names.get_by_right(&idx.usize()).map(|s| s.as_str());
    }

    /// Gets bone's index by name.
    #[inline]
    pub fn bone_by_name(&self, name: &str) -> Option<usize> {
        return self.bone_names.get_by_left(name).copied();
    }

    /// Index of the last bone of the subtree rooted at `idx`. Equals `idx` for leaves.
    #[inline]
    pub fn last_descendant(&self, idx: impl BoneIndex) -> usize {
        return self.last_descendants[idx.usize()];
    }

    /// Tests if `bone` is a strict descendant of `ancestor`.
    #[inline]
    pub fn is_descendant(&self, bone: impl BoneIndex, ancestor: impl BoneIndex) -> bool {
        let bone = bone.usize();
        let ancestor = ancestor.usize();
        return bone > ancestor && bone <= self.last_descendants[ancestor];
    }

    /// Test if a bone is a leaf.
    #[inline]
    pub fn is_leaf(&self, bone: impl BoneIndex) -> bool {
        return self.last_descendants[bone.usize()] == bone.usize();
    }

    /// Direct children of `bone`, in index order.
    pub fn children(&self, bone: impl BoneIndex) -> Vec<usize> {
        let bone = bone.usize();
        return (bone + 1..=self.last_descendants[bone])
            .filter(|&idx| self.bone_parents[idx] == bone as i32)
            .collect();
    }

    /// Ancestors of `bone` from its parent up to the root.
    pub fn ancestors(&self, bone: impl BoneIndex) -> Vec<usize> {
        let mut out = Vec::new();
        let mut parent = self.bone_parents[bone.usize()];
        while parent != NO_PARENT {
            out.push(parent as usize);
            parent = self.bone_parents[parent as usize];
        }
        return out;
    }

    /// Iterates through the subtree rooted at `from` in depth-first order.
    ///
    /// * `from` - The bone index to start from. If negative, the iteration covers every bone.
    /// * `f` - The function to call for each bone. The function takes arguments `(bone: usize, parent: i32)`.
    pub fn iter_depth_first<F>(&self, from: impl BoneIndex, mut f: F)
    where
        F: FnMut(usize, i32),
    {
        let (begin, end) = if from.i32() < 0 {
            (0, self.num_bones())
        } else if from.usize() >= self.num_bones() {
            return;
        } else {
            (from.usize(), self.last_descendants[from.usize()] + 1)
        };
        for idx in begin..end {
            f(idx, self.bone_parents[idx]);
        }
    }

    /// Iterates through the bone hierarchy in reverse depth-first order.
    pub fn iter_depth_first_reverse<F>(&self, mut f: F)
    where
        F: FnMut(usize, i32),
    {
        for idx in (0..self.num_bones()).rev() {
            f(idx, self.bone_parents[idx]);
        }
    }

    /// Computes reference pose in global (component) space.
    pub fn ref_pose_global(&self) -> Vec<Transform> {
        let mut global: Vec<Transform> = Vec::with_capacity(self.num_bones());
        for (idx, local) in self.bone_ref_poses.iter().enumerate() {
            let parent = self.bone_parents[idx];
            if parent == NO_PARENT {
                global.push(*local);
            } else {
                let parent_global = global[parent as usize];
                global.push(parent_global.mul_transform(local));
            }
        }
        return global;
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn names(n: &[&str]) -> Vec<String> {
        return n.iter().map(|s| s.to_string()).collect();
    }

    fn new_skeleton() -> Skeleton {
        // 6 bones
        //   b0
        //  /  \
        // b1  b3
        //  |  / \
        // b2 b4 b5
        return Skeleton::new(
            names(&["b0", "b1", "b2", "b3", "b4", "b5"]),
            vec![-1, 0, 1, 0, 3, 3],
            vec![Transform::from_translation(Vec3::Z); 6],
        )
        .unwrap();
    }

    #[test]
    fn test_hierarchy_queries() {
        let skeleton = new_skeleton();
        assert_eq!(skeleton.num_bones(), 6);
        assert_eq!(skeleton.bone_by_name("b4"), Some(4));
        assert_eq!(skeleton.bone_by_name("missing"), None);
        assert_eq!(skeleton.bone_name(3), Some("b3"));
        assert_eq!(skeleton.parent_of(0), None);
        assert_eq!(skeleton.parent_of(5), Some(3));

        assert_eq!(skeleton.last_descendant(0), 5);
        assert_eq!(skeleton.last_descendant(1), 2);
        assert_eq!(skeleton.last_descendant(3), 5);
        assert_eq!(skeleton.last_descendant(4), 4);

        assert!(skeleton.is_descendant(2, 1));
        assert!(skeleton.is_descendant(5, 0));
        assert!(!skeleton.is_descendant(4, 1));
        assert!(!skeleton.is_descendant(1, 1));

        assert!(skeleton.is_leaf(2));
        assert!(!skeleton.is_leaf(3));
        assert_eq!(skeleton.children(3), vec![4, 5]);
        assert_eq!(skeleton.children(0), vec![1, 3]);
        assert_eq!(skeleton.ancestors(5), vec![3, 0]);
    }

    #[test]
    fn test_iter_depth_first() {
        let skeleton = new_skeleton();

        let mut visited = Vec::new();
        skeleton.iter_depth_first(3, |bone, _| visited.push(bone));
        assert_eq!(visited, vec![3, 4, 5]);

        let mut visited = Vec::new();
        skeleton.iter_depth_first(-1, |bone, _| visited.push(bone));
        assert_eq!(visited, vec![0, 1, 2, 3, 4, 5]);

        let mut visited = Vec::new();
        skeleton.iter_depth_first_reverse(|bone, _| visited.push(bone));
        assert_eq!(visited, vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_ref_pose_global() {
        let skeleton = new_skeleton();
        let global = skeleton.ref_pose_global();
        assert_eq!(global[0].translation, Vec3::Z);
        assert_eq!(global[2].translation, Vec3::Z * 3.0);
        assert_eq!(global[5].translation, Vec3::Z * 3.0);
    }

    #[test]
    fn test_invalid_hierarchy() {
        // parent after child
        let err = Skeleton::new(names(&["a", "b"]), vec![1, -1], vec![Transform::IDENTITY; 2]).unwrap_err();
        assert!(err.is_invalid_hierarchy());

        // not depth-first: b2 belongs to b1 but b3 (child of b0) is in between
        let err = Skeleton::new(
            names(&["b0", "b1", "b3", "b2"]),
            vec![-1, 0, 0, 1],
            vec![Transform::IDENTITY; 4],
        )
        .unwrap_err();
        assert!(err.is_invalid_hierarchy());

        // duplicated names
        let err = Skeleton::new(names(&["a", "a"]), vec![-1, 0], vec![Transform::IDENTITY; 2]).unwrap_err();
        assert!(err.is_invalid_hierarchy());

        // length mismatch
        let err = Skeleton::new(names(&["a"]), vec![-1, 0], vec![Transform::IDENTITY; 2]).unwrap_err();
        assert!(err.is_invalid_hierarchy());
    }
}
