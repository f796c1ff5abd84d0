use std::fmt::{self, Display};
use std::sync::Arc;

use tokio::sync::watch;

use crate::address::Address;

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Identifies a view. Ids are issued by the group-membership protocol and
/// increase monotonically within a cluster.
pub struct ViewId(pub u64);

impl Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// An immutable snapshot of the members currently in the group.
///
/// The member list is deduplicated and keeps its insertion order, which is
/// also the iteration order used when fanning a request out.
pub struct View {
    id: ViewId,
    members: Vec<Address>,
}

impl View {
    /// Creates a new view, dropping duplicate members while preserving order.
    pub fn new(id: u64, members: impl IntoIterator<Item = Address>) -> Self {
        let mut unique = Vec::new();
        for member in members {
            if !unique.contains(&member) {
                unique.push(member);
            }
        }

        Self {
            id: ViewId(id),
            members: unique,
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn members(&self) -> &[Address] {
        &self.members
    }

    pub fn contains(&self, member: &Address) -> bool {
        self.members.contains(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ({}) [", self.id, self.members.len())?;
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{member}")?;
        }
        f.write_str("]")
    }
}

/// The dispatcher's always-current membership snapshot.
///
/// The snapshot is replaced wholesale on every view change; readers get
/// either the old or the new view, never a torn state. Subscribers can watch
/// for replacements.
pub(crate) struct Membership {
    current: watch::Sender<Arc<View>>,
}

impl Membership {
    pub(crate) fn new() -> Self {
        let (current, _) = watch::channel(Arc::new(View::default()));
        Self { current }
    }

    /// Installs a new view, waking any subscribers.
    pub(crate) fn install(&self, view: View) {
        self.current.send_replace(Arc::new(view));
    }

    pub(crate) fn snapshot(&self) -> Arc<View> {
        self.current.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<View>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_are_dropped() {
        let a = Address::from("a");
        let b = Address::from("b");
        let view = View::new(1, vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(view.members(), &[a, b]);
    }

    #[test]
    fn test_membership_is_replaced_wholesale() {
        let membership = Membership::new();
        assert!(membership.snapshot().is_empty());

        let view = View::new(3, vec![Address::from("a")]);
        membership.install(view.clone());
        assert_eq!(membership.snapshot().as_ref(), &view);
    }
}
