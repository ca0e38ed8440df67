use std::sync::Arc;

use crate::base::RetargetError;
use crate::chain_set::RetargetChainSet;
use crate::debug::DebugSink;
use crate::hierarchy::{BoneHierarchy, TargetBoneHierarchy};
use crate::ik_goal::IKGoalContainer;
use crate::logger::RetargetLog;
use crate::op::{OpInitContext, OpPostInitContext, OpRunContext, OpSettings, RetargetOp};
use crate::rig::IKRigDefinition;

/// What the op stack initializes against.
pub struct OpStackInitContext<'t> {
    pub source: &'t BoneHierarchy,
    pub target: &'t mut TargetBoneHierarchy,
    pub chains: &'t RetargetChainSet,
    pub source_rig: &'t Arc<IKRigDefinition>,
    pub target_rig: &'t Arc<IKRigDefinition>,
    pub goals: &'t mut IKGoalContainer,
    pub log: &'t mut RetargetLog,
}

///
/// Ordered list of retargeting ops.
///
/// An op naming a parent always sits before that parent: children run first, so their
/// output (IK goals) is ready when the parent runs. Parents are resolved by name into
/// indices at initialization.
///
#[derive(Debug, Clone, Default)]
pub struct OpStack {
    ops: Vec<Box<dyn RetargetOp>>,
    parent_indices: Vec<Option<usize>>,
}

impl OpStack {
    pub fn new() -> OpStack {
        return OpStack::default();
    }

    #[inline]
    pub fn len(&self) -> usize {
        return self.ops.len();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        return self.ops.is_empty();
    }

    #[inline]
    pub fn ops(&self) -> &[Box<dyn RetargetOp>] {
        return &self.ops;
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &dyn RetargetOp> {
        return self.ops.iter().map(|op| op.as_ref());
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        return self.ops.iter().position(|op| op.name() == name);
    }

    pub fn op(&self, name: &str) -> Option<&dyn RetargetOp> {
        return self.ops.iter().find(|op| op.name() == name).map(|op| op.as_ref());
    }

    pub fn op_mut(&mut self, name: &str) -> Option<&mut Box<dyn RetargetOp>> {
        return self.ops.iter_mut().find(|op| op.name() == name);
    }

    /// Index of the parent of the op at `index`, as resolved by the last initialization.
    #[inline]
    pub fn parent_index(&self, index: usize) -> Option<usize> {
        return self.parent_indices.get(index).copied().flatten();
    }

    fn unique_name(&self, name: &str) -> String {
        let name = if name.is_empty() { "Op" } else { name };
        if self.index_of(name).is_none() {
            return name.to_string();
        }
        let mut suffix = 1;
        loop {
            let candidate = format!("{} {}", name, suffix);
            if self.index_of(&candidate).is_none() {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Appends `op`, renaming it when its name is taken. Returns the final name.
    pub fn add_op(&mut self, mut op: Box<dyn RetargetOp>) -> String {
        let name = self.unique_name(op.name());
        op.header_mut().name = name.clone();
        self.ops.push(op);
        self.parent_indices.clear();
        self.sort_children_before_parents();
        return name;
    }

    /// Appends a new op built from `settings`, named after its kind.
    pub fn add_op_with_settings(&mut self, settings: &OpSettings) -> String {
        let op = settings.create_op(settings.kind().default_name());
        return self.add_op(op);
    }

    /// Removes the op named `name`. Its children lose their parent.
    pub fn remove_op(&mut self, name: &str) -> Option<Box<dyn RetargetOp>> {
        let index = self.index_of(name)?;
        let op = self.ops.remove(index);
        for other in self.ops.iter_mut() {
            if other.parent_name() == Some(name) {
                other.header_mut().parent = None;
            }
        }
        self.parent_indices.clear();
        return Some(op);
    }

    /// Makes `parent` the parent of `child` and moves `child` before it.
    pub fn set_parent(&mut self, child: &str, parent: Option<&str>) -> Result<(), RetargetError> {
        let child_index = self
            .index_of(child)
            .ok_or_else(|| RetargetError::InvalidParentOp(format!("no op named '{}'", child)))?;
        let parent = match parent {
            Some(parent) => parent,
            None => {
                self.ops[child_index].header_mut().parent = None;
                self.parent_indices.clear();
                return Ok(());
            }
        };

        let parent_index = self
            .index_of(parent)
            .ok_or_else(|| RetargetError::InvalidParentOp(format!("no op named '{}'", parent)))?;
        let expected = self.ops[child_index].parent_op_kind();
        let actual = self.ops[parent_index].kind();
        if expected != Some(actual) {
            return Err(RetargetError::InvalidParentOp(format!(
                "'{}' cannot be parented to '{}' ({:?})",
                child, parent, actual
            )));
        }

        self.ops[child_index].header_mut().parent = Some(parent.to_string());
        self.parent_indices.clear();
        self.sort_children_before_parents();
        return Ok(());
    }

    /// Moves every op with a parent right before it, keeping relative order otherwise.
    pub fn sort_children_before_parents(&mut self) {
        // bounded, parent cycles cannot loop forever
        let max_passes = self.ops.len() * self.ops.len() + 1;
        for _ in 0..max_passes {
            let mut moved = false;
            for child in 0..self.ops.len() {
                let parent = match self.ops[child].parent_name().and_then(|p| self.index_of(p)) {
                    Some(parent) => parent,
                    None => continue,
                };
                if child > parent {
                    let op = self.ops.remove(child);
                    self.ops.insert(parent, op);
                    moved = true;
                    break;
                }
            }
            if !moved {
                return;
            }
        }
    }

    fn resolve_parents(&mut self) {
        self.parent_indices = self
            .ops
            .iter()
            .map(|op| op.parent_name().and_then(|parent| self.index_of(parent)))
            .collect();
    }

    fn validate_parent(&self, index: usize, log: &mut RetargetLog) -> Result<Option<usize>, ()> {
        let op = &self.ops[index];
        let required = match op.parent_op_kind() {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let parent = match self.parent_index(index) {
            Some(parent) => parent,
            None => {
                log.warning(format!("{}: requires a parent op of kind {:?}", op.name(), required));
                return Err(());
            }
        };
        let parent_op = &self.ops[parent];
        if parent_op.kind() != required || parent <= index {
            log.warning(format!(
                "{}: parent '{}' is not a valid {:?} op",
                op.name(),
                parent_op.name(),
                required
            ));
            return Err(());
        }
        if !parent_op.is_enabled() {
            log.warning(format!("{}: parent '{}' is disabled", op.name(), parent_op.name()));
            return Err(());
        }
        return Ok(Some(parent));
    }

    ///
    /// Initializes every enabled op in stack order, then publishes the bones they claim to
    /// the target mask and post-initializes them.
    ///
    /// An op failing to initialize is skipped, with a warning. So are the children of a
    /// parent that failed. Returns the number of initialized ops.
    ///
    pub fn initialize(&mut self, ctx: &mut OpStackInitContext) -> usize {
        self.sort_children_before_parents();
        self.resolve_parents();
        ctx.target.reset_retargeted_mask();
        ctx.goals.clear();

        for index in 0..self.ops.len() {
            self.ops[index].header_mut().initialized = false;
            if !self.ops[index].is_enabled() {
                continue;
            }
            let parent = match self.validate_parent(index, ctx.log) {
                Ok(parent) => parent,
                Err(()) => continue,
            };

            let split = parent.unwrap_or(self.ops.len());
            let (head, tail) = self.ops.split_at_mut(split);
            let op = &mut head[index];
            let mut op_ctx = OpInitContext {
                source: ctx.source,
                target: ctx.target.hierarchy(),
                chains: ctx.chains,
                source_rig: ctx.source_rig,
                target_rig: ctx.target_rig,
                parent: tail.first().map(|parent| parent.as_ref()),
                goals: &mut *ctx.goals,
                log: &mut *ctx.log,
            };
            let ok = op.initialize(&mut op_ctx);
            op.header_mut().initialized = ok;
            if !ok {
                ctx.log
                    .warning(format!("{}: failed to initialize, op disabled", op.name()));
            }
        }

        // children of failed parents cannot run
        for index in 0..self.ops.len() {
            if let Some(parent) = self.parent_index(index) {
                if self.ops[index].is_initialized() && !self.ops[parent].is_initialized() {
                    ctx.log.warning(format!(
                        "{}: parent '{}' failed to initialize, op disabled",
                        self.ops[index].name(),
                        self.ops[parent].name()
                    ));
                    self.ops[index].header_mut().initialized = false;
                }
            }
        }

        let mut bones = Vec::new();
        for op in self.ops.iter().filter(|op| op.is_initialized()) {
            op.collect_retargeted_bones(&mut bones);
        }
        ctx.target.set_retargeted_bones(bones);

        let mut post_ctx = OpPostInitContext {
            source: ctx.source,
            target: &*ctx.target,
            log: &mut *ctx.log,
        };
        let mut count = 0;
        for op in self.ops.iter_mut().filter(|op| op.is_initialized()) {
            op.post_initialize(&mut post_ctx);
            count += 1;
        }
        ctx.log.info(format!("{} of {} ops initialized", count, self.ops.len()));
        return count;
    }

    /// Runs every enabled and initialized op in stack order.
    pub fn run(&mut self, ctx: &mut OpRunContext, debug: Option<&dyn DebugSink>) {
        for op in self.ops.iter_mut() {
            if !op.is_enabled() || !op.is_initialized() {
                continue;
            }
            op.run(ctx);
            if let Some(debug) = debug {
                debug.on_op_finished(op.name(), ctx.target_pose);
            }
        }
    }
}
