//! User gate applied before any dispatch.

use std::collections::HashSet;

/// Accept-list / ignore-list of user ids.
///
/// A non-empty accept-list takes precedence: only listed users pass, whatever
/// the ignore-list says. With an empty accept-list, everyone except ignored
/// users passes.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    accept: HashSet<String>,
    ignore: HashSet<String>,
}

impl UserFilter {
    /// A filter that lets everyone through.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn new<A, I, S>(accept: A, ignore: I) -> Self
    where
        A: IntoIterator<Item = S>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accept: accept.into_iter().map(Into::into).collect(),
            ignore: ignore.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accept(mut self, user: impl Into<String>) -> Self {
        self.accept.insert(user.into());
        self
    }

    pub fn ignore(mut self, user: impl Into<String>) -> Self {
        self.ignore.insert(user.into());
        self
    }

    /// Returns whether events from `user_id` may be dispatched.
    pub fn allows(&self, user_id: &str) -> bool {
        if !self.accept.is_empty() {
            return self.accept.contains(user_id);
        }
        !self.ignore.contains(user_id)
    }
}
