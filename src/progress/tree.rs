use std::sync::{Arc, Weak};

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::changes::{ChangeFeed, ChangeKind, ChangeRecord};
use super::status::{LogRecord, Status, TaskMode};
use crate::core::errors::{DispatchError, Result};

/// What a dispatch was created from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskTarget {
    pub queue_id: Option<Uuid>,
    pub script_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

/// Initial content of a script entry
#[derive(Debug, Clone)]
pub struct ScriptSeed {
    pub script_id: Uuid,
    pub name: String,
    pub users: Vec<UserSeed>,
}

/// Initial content of a user entry
#[derive(Debug, Clone)]
pub struct UserSeed {
    pub user_id: String,
    pub name: String,
}

impl UserSeed {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
        }
    }

    /// Stand-in shown until the script executor loads the real users
    pub fn placeholder() -> Self {
        Self::new(Uuid::new_v4().to_string(), "not loaded yet")
    }
}

/// Owned view of one script entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptRecord {
    pub script_id: Uuid,
    pub name: String,
    pub status: Status,
    pub users: Vec<UserRecord>,
    pub current_index: isize,
    pub log: String,
}

/// Owned view of one user entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub user_id: String,
    pub name: String,
    pub status: Status,
    pub logs: IndexMap<DateTime<Local>, LogRecord>,
}

struct ScriptNode {
    script_id: Uuid,
    name: String,
    status: Status,
    users: Vec<usize>,
    current_index: isize,
    log: String,
}

struct UserNode {
    // None once the owning script replaced its user list
    parent: Option<usize>,
    // Bumped each time the slot is reused
    epoch: u64,
    user_id: String,
    name: String,
    status: Status,
    logs: IndexMap<DateTime<Local>, LogRecord>,
    open: Option<DateTime<Local>>,
}

struct Tree {
    // Bumped whenever the script list is replaced; stale handles stop resolving
    generation: u64,
    current_index: isize,
    scripts: Vec<ScriptNode>,
    users: UserArena,
}

/// User nodes of every script. Slots detached by a user-list replacement
/// are reused; handles carry the slot epoch so they never reach a reused slot.
#[derive(Default)]
struct UserArena {
    nodes: Vec<UserNode>,
    free: Vec<usize>,
}

impl UserArena {
    fn insert(&mut self, parent: usize, seed: UserSeed) -> (usize, u64) {
        if let Some(slot) = self.free.pop() {
            if let Some(node) = self.nodes.get_mut(slot) {
                let epoch = node.epoch + 1;
                *node = UserNode::new(parent, seed, epoch);
                return (slot, epoch);
            }
        }
        self.nodes.push(UserNode::new(parent, seed, 0));
        (self.nodes.len() - 1, 0)
    }

    fn detach(&mut self, slot: usize) {
        if let Some(node) = self.nodes.get_mut(slot) {
            if node.parent.take().is_some() {
                self.free.push(slot);
            }
        }
    }

    fn get(&self, slot: usize, epoch: u64) -> Option<&UserNode> {
        self.nodes
            .get(slot)
            .filter(|node| node.epoch == epoch && node.parent.is_some())
    }

    fn get_mut(&mut self, slot: usize, epoch: u64) -> Option<&mut UserNode> {
        self.nodes
            .get_mut(slot)
            .filter(|node| node.epoch == epoch && node.parent.is_some())
    }

    fn epoch(&self, slot: usize) -> u64 {
        self.nodes.get(slot).map(|node| node.epoch).unwrap_or_default()
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
    }
}

impl UserNode {
    fn new(parent: usize, seed: UserSeed, epoch: u64) -> Self {
        Self {
            parent: Some(parent),
            epoch,
            user_id: seed.user_id,
            name: seed.name,
            status: Status::Waiting,
            logs: IndexMap::new(),
            open: None,
        }
    }

    fn view(&self) -> UserRecord {
        UserRecord {
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            status: self.status,
            logs: self.logs.clone(),
        }
    }
}

impl Tree {
    fn script_view(&self, node: &ScriptNode) -> ScriptRecord {
        ScriptRecord {
            script_id: node.script_id,
            name: node.name.clone(),
            status: node.status,
            users: node
                .users
                .iter()
                .filter_map(|&slot| self.users.nodes.get(slot))
                .map(UserNode::view)
                .collect(),
            current_index: node.current_index,
            log: node.log.clone(),
        }
    }
}

fn apply_status(current: &mut Status, next: Status) -> Result<bool> {
    if *current == next {
        return Ok(false);
    }
    if !current.can_transition_to(next) {
        return Err(DispatchError::InvalidTransition {
            from: *current,
            to: next,
        });
    }
    *current = next;
    Ok(true)
}

fn advance_index(current: &mut isize, requested: isize, len: usize) -> Result<bool> {
    if requested < *current || requested > len as isize {
        return Err(DispatchError::IndexOutOfOrder {
            current: *current,
            requested,
            len,
        });
    }
    let changed = requested != *current;
    *current = requested;
    Ok(changed)
}

/// Live progress of one dispatch: task -> scripts -> users.
///
/// Children live in flat tables owned by the record and refer to their
/// parent by index; [`ScriptHandle`] and [`UserHandle`] reach back through a
/// weak reference, so a released record simply stops observing mutations.
pub struct TaskRecord {
    id: Uuid,
    mode: TaskMode,
    target: TaskTarget,
    tree: RwLock<Tree>,
    changes: mpsc::UnboundedSender<ChangeRecord>,
}

impl TaskRecord {
    pub fn new(id: Uuid, mode: TaskMode, target: TaskTarget) -> (Arc<Self>, ChangeFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let record = Arc::new(Self {
            id,
            mode,
            target,
            tree: RwLock::new(Tree {
                generation: 0,
                current_index: -1,
                scripts: Vec::new(),
                users: UserArena::default(),
            }),
            changes: tx,
        });
        (record, ChangeFeed::new(rx))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> TaskMode {
        self.mode
    }

    pub fn target(&self) -> TaskTarget {
        self.target
    }

    pub fn queue_id(&self) -> Option<Uuid> {
        self.target.queue_id
    }

    pub fn script_id(&self) -> Option<Uuid> {
        self.target.script_id
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.target.user_id
    }

    /// -1 before the first script, `len` once every script was admitted
    pub fn current_index(&self) -> isize {
        self.tree.read().current_index
    }

    pub fn len(&self) -> usize {
        self.tree.read().scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().scripts.is_empty()
    }

    pub fn set_current_index(&self, index: isize) -> Result<()> {
        let changed = {
            let mut tree = self.tree.write();
            let len = tree.scripts.len();
            advance_index(&mut tree.current_index, index, len)?
        };
        if changed {
            self.emit(None, ChangeKind::TaskIndex);
        }
        Ok(())
    }

    /// Replace the script list. Handles from the previous list stop resolving.
    pub fn set_scripts(self: &Arc<Self>, seeds: Vec<ScriptSeed>) -> Vec<ScriptHandle> {
        let generation = {
            let mut tree = self.tree.write();
            tree.generation += 1;
            tree.current_index = -1;
            tree.scripts.clear();
            tree.users.clear();
            for (index, seed) in seeds.into_iter().enumerate() {
                let slots = seed
                    .users
                    .into_iter()
                    .map(|user| tree.users.insert(index, user).0)
                    .collect();
                tree.scripts.push(ScriptNode {
                    script_id: seed.script_id,
                    name: seed.name,
                    status: Status::Waiting,
                    users: slots,
                    current_index: -1,
                    log: String::new(),
                });
            }
            tree.generation
        };
        self.emit(None, ChangeKind::Scripts);
        self.script_handles_for(generation)
    }

    pub fn script_handles(self: &Arc<Self>) -> Vec<ScriptHandle> {
        let generation = self.tree.read().generation;
        self.script_handles_for(generation)
    }

    fn script_handles_for(self: &Arc<Self>, generation: u64) -> Vec<ScriptHandle> {
        let len = self.tree.read().scripts.len();
        (0..len)
            .map(|index| ScriptHandle {
                task: Arc::downgrade(self),
                generation,
                index,
            })
            .collect()
    }

    pub fn scripts(&self) -> Vec<ScriptRecord> {
        let tree = self.tree.read();
        tree.scripts.iter().map(|node| tree.script_view(node)).collect()
    }

    pub fn script(&self, index: usize) -> Option<ScriptRecord> {
        let tree = self.tree.read();
        tree.scripts.get(index).map(|node| tree.script_view(node))
    }

    /// Progress line of the script currently being admitted, if any
    pub fn current_log(&self) -> Option<String> {
        let tree = self.tree.read();
        usize::try_from(tree.current_index)
            .ok()
            .and_then(|index| tree.scripts.get(index))
            .map(|node| node.log.clone())
    }

    fn emit(&self, script: Option<usize>, kind: ChangeKind) {
        // Nobody draining the feed is not an error
        let _ = self.changes.send(ChangeRecord {
            task_id: self.id,
            script,
            kind,
        });
    }

    fn with_script<R>(
        &self,
        generation: u64,
        index: usize,
        f: impl FnOnce(&mut ScriptNode, &mut UserArena) -> R,
    ) -> Option<R> {
        let mut tree = self.tree.write();
        if tree.generation != generation {
            return None;
        }
        let Tree { scripts, users, .. } = &mut *tree;
        scripts.get_mut(index).map(|node| f(node, users))
    }

    fn with_user<R>(
        &self,
        generation: u64,
        slot: usize,
        epoch: u64,
        f: impl FnOnce(&mut UserNode) -> R,
    ) -> Option<(usize, R)> {
        let mut tree = self.tree.write();
        if tree.generation != generation {
            return None;
        }
        let node = tree.users.get_mut(slot, epoch)?;
        let parent = node.parent?;
        Some((parent, f(node)))
    }
}

impl std::fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("target", &self.target)
            .field("current_index", &self.current_index())
            .finish()
    }
}

/// Mutating handle to one script entry
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    task: Weak<TaskRecord>,
    generation: u64,
    index: usize,
}

impl ScriptHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn task(&self) -> Option<Arc<TaskRecord>> {
        self.task.upgrade()
    }

    pub fn record(&self) -> Option<ScriptRecord> {
        let task = self.task.upgrade()?;
        let tree = task.tree.read();
        if tree.generation != self.generation {
            return None;
        }
        tree.scripts.get(self.index).map(|node| tree.script_view(node))
    }

    fn mutate<R>(
        &self,
        kind: ChangeKind,
        f: impl FnOnce(&mut ScriptNode, &mut UserArena) -> Result<(bool, R)>,
    ) -> Result<Option<R>> {
        let Some(task) = self.task.upgrade() else {
            return Ok(None);
        };
        match task.with_script(self.generation, self.index, f) {
            Some(Ok((changed, out))) => {
                if changed {
                    task.emit(Some(self.index), kind);
                }
                Ok(Some(out))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    pub fn set_status(&self, status: Status) -> Result<()> {
        self.mutate(ChangeKind::ScriptStatus, |node, _| {
            Ok((apply_status(&mut node.status, status)?, ()))
        })?;
        Ok(())
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        let _ = self.mutate(ChangeKind::ScriptName, |node, _| {
            let changed = node.name != name;
            node.name = name;
            Ok((changed, ()))
        });
    }

    /// Free-text progress line shown for the script
    pub fn set_log(&self, text: impl Into<String>) {
        let text = text.into();
        let _ = self.mutate(ChangeKind::ScriptLog, |node, _| {
            let changed = node.log != text;
            node.log = text;
            Ok((changed, ()))
        });
    }

    pub fn set_current_index(&self, index: isize) -> Result<()> {
        self.mutate(ChangeKind::ScriptIndex, |node, _| {
            let len = node.users.len();
            Ok((advance_index(&mut node.current_index, index, len)?, ()))
        })?;
        Ok(())
    }

    /// Replace the user list. Previous user handles are detached before the
    /// new entries become visible.
    pub fn replace_users(&self, seeds: Vec<UserSeed>) -> Vec<UserHandle> {
        let index = self.index;
        let slots = self
            .mutate(ChangeKind::Users, |node, users| {
                for &slot in &node.users {
                    users.detach(slot);
                }
                let slots: Vec<(usize, u64)> = seeds
                    .into_iter()
                    .map(|seed| users.insert(index, seed))
                    .collect();
                node.users = slots.iter().map(|&(slot, _)| slot).collect();
                node.current_index = -1;
                Ok((true, slots))
            })
            .ok()
            .flatten()
            .unwrap_or_default();
        self.user_handles_for(slots)
    }

    pub fn users(&self) -> Vec<UserHandle> {
        let slots = self
            .task
            .upgrade()
            .and_then(|task| {
                let tree = task.tree.read();
                if tree.generation != self.generation {
                    return None;
                }
                tree.scripts.get(self.index).map(|node| {
                    node.users
                        .iter()
                        .map(|&slot| (slot, tree.users.epoch(slot)))
                        .collect()
                })
            })
            .unwrap_or_default();
        self.user_handles_for(slots)
    }

    fn user_handles_for(&self, slots: Vec<(usize, u64)>) -> Vec<UserHandle> {
        slots
            .into_iter()
            .map(|(slot, epoch)| UserHandle {
                task: self.task.clone(),
                generation: self.generation,
                slot,
                epoch,
            })
            .collect()
    }
}

/// Mutating handle to one user entry
#[derive(Debug, Clone)]
pub struct UserHandle {
    task: Weak<TaskRecord>,
    generation: u64,
    slot: usize,
    epoch: u64,
}

impl UserHandle {
    pub fn record(&self) -> Option<UserRecord> {
        let task = self.task.upgrade()?;
        let tree = task.tree.read();
        if tree.generation != self.generation {
            return None;
        }
        tree.users.get(self.slot, self.epoch).map(UserNode::view)
    }

    pub fn is_attached(&self) -> bool {
        self.record().is_some()
    }

    fn mutate<R>(
        &self,
        kind: ChangeKind,
        f: impl FnOnce(&mut UserNode) -> Result<(bool, R)>,
    ) -> Result<Option<R>> {
        let Some(task) = self.task.upgrade() else {
            return Ok(None);
        };
        match task.with_user(self.generation, self.slot, self.epoch, f) {
            Some((parent, Ok((changed, out)))) => {
                if changed {
                    task.emit(Some(parent), kind);
                }
                Ok(Some(out))
            }
            Some((_, Err(e))) => Err(e),
            None => Ok(None),
        }
    }

    pub fn set_status(&self, status: Status) -> Result<()> {
        self.mutate(ChangeKind::UserStatus, |node| {
            Ok((apply_status(&mut node.status, status)?, ()))
        })?;
        Ok(())
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        let _ = self.mutate(ChangeKind::UserName, |node| {
            let changed = node.name != name;
            node.name = name;
            Ok((changed, ()))
        });
    }

    /// Open a new attempt keyed by its start time and mark the user running.
    pub fn begin_attempt(&self, started: DateTime<Local>) -> Result<()> {
        self.mutate(ChangeKind::UserLog, |node| {
            if node.open.is_some() {
                return Err(DispatchError::AttemptOpen {
                    user_id: node.user_id.clone(),
                });
            }
            node.logs.insert(started, LogRecord::default());
            node.open = Some(started);
            node.status = Status::Running;
            Ok((true, ()))
        })?;
        Ok(())
    }

    fn with_open<R>(
        &self,
        f: impl FnOnce(&mut UserNode, DateTime<Local>) -> R,
    ) -> Result<()> {
        self.mutate(ChangeKind::UserLog, |node| match node.open {
            Some(started) => {
                f(node, started);
                Ok((true, ()))
            }
            None => Err(DispatchError::NoOpenAttempt {
                user_id: node.user_id.clone(),
            }),
        })?;
        Ok(())
    }

    pub fn append_log(&self, line: impl Into<String>) -> Result<()> {
        let line = line.into();
        self.with_open(|node, started| {
            if let Some(log) = node.logs.get_mut(&started) {
                log.lines.push(line);
            }
        })
    }

    pub fn set_attempt_status(&self, status: impl Into<String>) -> Result<()> {
        let status = status.into();
        self.with_open(|node, started| {
            if let Some(log) = node.logs.get_mut(&started) {
                log.status = status;
            }
        })
    }

    /// Record the terminal status of the open attempt and close it
    pub fn close_attempt(&self, status: impl Into<String>) -> Result<()> {
        let status = status.into();
        self.with_open(|node, started| {
            if let Some(log) = node.logs.get_mut(&started) {
                log.status = status;
            }
            node.open = None;
        })
    }

    /// Close the open attempt, if any, with `status`. Returns whether one was open.
    pub fn interrupt_attempt(&self, status: impl Into<String>) -> bool {
        self.close_attempt(status).is_ok() && self.is_attached()
    }
}
