pub mod task;
pub mod user;

pub use task::{
    NewTask, ParseEnumError, Task, TaskChanges, TaskFilter, TaskPriority, TaskStatus,
    TransitionError,
};
pub use user::{NewUser, Role, SortOrder, User, UserChanges, UserPage, UserSortField};

/// The identity a store operation is performed on behalf of.
///
/// Carries only what ownership checks need; the full request principal lives in
/// `auth::Principal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub admin: bool,
}

impl Actor {
    /// May this actor mutate or delete the task?
    pub fn may_modify(&self, task: &Task) -> bool {
        self.admin || task.owner_id == self.user_id
    }

    /// May this actor read the task? Assignees can read what they cannot modify.
    pub fn may_view(&self, task: &Task) -> bool {
        self.may_modify(task) || task.assignee_id == Some(self.user_id)
    }
}
