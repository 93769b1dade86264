//! A single descriptor-table cell.

/// Proof of a reservation on a [`Slot`].
///
/// Tokens are consumed by [`Slot::try_fill`] or
/// [`Slot::release_reservation`]. A token only matches the reservation that
/// produced it, so a slot that was released and reserved again in the
/// meantime cannot be filled through a stale token.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation must be filled or released"]
pub struct SlotToken {
    generation: u64,
}

#[derive(Debug)]
enum SlotState<T> {
    Empty,
    Reserved(u64),
    Occupied(T),
}

/// Descriptor-table cell: empty, reserved, or holding an object.
///
/// Slots are not synchronized themselves; the owning table's lock guards
/// every transition.
#[derive(Debug)]
pub struct Slot<T> {
    state: SlotState<T>,
    generation: u64,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    /// Create an empty slot.
    pub const fn new() -> Self {
        Self {
            state: SlotState::Empty,
            generation: 0,
        }
    }

    /// Returns true if nothing holds this slot.
    pub fn is_empty(&self) -> bool {
        matches!(self.state, SlotState::Empty)
    }

    /// Returns true if the slot is reserved but not yet filled.
    pub fn is_reserved(&self) -> bool {
        matches!(self.state, SlotState::Reserved(_))
    }

    /// Returns true if the slot holds an object.
    pub fn is_occupied(&self) -> bool {
        matches!(self.state, SlotState::Occupied(_))
    }

    /// Borrow the occupant, if any.
    pub fn get_ref(&self) -> Option<&T> {
        match &self.state {
            SlotState::Occupied(obj) => Some(obj),
            _ => None,
        }
    }

    /// Install `obj` if the slot is empty.
    ///
    /// On failure the slot is untouched and `obj` is handed back.
    pub fn try_set(&mut self, obj: T) -> Result<(), T> {
        match self.state {
            SlotState::Empty => {
                self.state = SlotState::Occupied(obj);
                Ok(())
            }
            _ => Err(obj),
        }
    }

    /// Install `obj` whatever the current state, returning the previous
    /// occupant. A pending reservation is cancelled.
    pub fn replace(&mut self, obj: T) -> Option<T> {
        match std::mem::replace(&mut self.state, SlotState::Occupied(obj)) {
            SlotState::Occupied(prev) => Some(prev),
            _ => None,
        }
    }

    /// Remove and return the occupant, leaving the slot empty.
    ///
    /// Reserved and empty slots are left as they are.
    pub fn release(&mut self) -> Option<T> {
        if !self.is_occupied() {
            return None;
        }
        match std::mem::replace(&mut self.state, SlotState::Empty) {
            SlotState::Occupied(prev) => Some(prev),
            _ => None,
        }
    }

    /// Reserve an empty slot.
    pub fn try_reserve(&mut self) -> Option<SlotToken> {
        if !self.is_empty() {
            return None;
        }
        self.generation += 1;
        self.state = SlotState::Reserved(self.generation);
        Some(SlotToken {
            generation: self.generation,
        })
    }

    /// Fill the reservation `token` with `obj`.
    ///
    /// Fails, handing `obj` back, unless the slot is still reserved under
    /// exactly this token.
    pub fn try_fill(&mut self, obj: T, token: SlotToken) -> Result<(), T> {
        match self.state {
            SlotState::Reserved(generation) if generation == token.generation => {
                self.state = SlotState::Occupied(obj);
                Ok(())
            }
            _ => Err(obj),
        }
    }

    /// Give back the reservation `token`.
    ///
    /// Returns false, without touching the slot, if the reservation was
    /// already superseded.
    pub fn release_reservation(&mut self, token: SlotToken) -> bool {
        match self.state {
            SlotState::Reserved(generation) if generation == token.generation => {
                self.state = SlotState::Empty;
                true
            }
            _ => false,
        }
    }
}

impl<T: Clone> Slot<T> {
    /// Clone out the occupant, if any.
    pub fn get(&self) -> Option<T> {
        self.get_ref().cloned()
    }
}
