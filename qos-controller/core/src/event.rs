/// A change observed for a single cluster object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingEvent<T> {
    Created { new: T },
    Updated { old: T, new: T },
    Deleted { old: T },
}

// === impl PendingEvent ===

impl<T> PendingEvent<T> {
    /// Derives an event from the cached snapshot (if any) and the newly observed one.
    pub fn from_snapshots(old: Option<T>, new: T) -> Self {
        match old {
            Some(old) => Self::Updated { old, new },
            None => Self::Created { new },
        }
    }

    /// The state before the change, if the object existed.
    pub fn previous(&self) -> Option<&T> {
        match self {
            Self::Created { .. } => None,
            Self::Updated { old, .. } | Self::Deleted { old } => Some(old),
        }
    }

    /// The state after the change, if the object still exists.
    pub fn current(&self) -> Option<&T> {
        match self {
            Self::Created { new } | Self::Updated { new, .. } => Some(new),
            Self::Deleted { .. } => None,
        }
    }

    /// Every snapshot carried by the event, oldest first.
    pub fn snapshots(&self) -> impl Iterator<Item = &T> {
        self.previous().into_iter().chain(self.current())
    }
}
