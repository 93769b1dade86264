//! Fixed-capacity descriptor table.

use std::fmt;

use parking_lot::Mutex;

use super::slot::{Slot, SlotToken};
use crate::error::{NsError, NsResult};

/// Compile-time upper bound on the number of descriptors.
pub const MAX_FD: usize = 1024;

/// A descriptor number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fd(usize);

impl Fd {
    /// Wrap a raw descriptor number.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The raw descriptor number.
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A descriptor number claimed before its object exists.
///
/// Hand it to [`FdTable::assign`] to fill the slot. Dropping it, whether
/// through [`FdTable::unreserve`], an early return or a panic, gives the slot
/// back.
#[derive(Debug)]
#[must_use = "dropping a reservation releases the descriptor"]
pub struct Reservation<'a, T> {
    table: &'a FdTable<T>,
    fd: Fd,
    token: Option<SlotToken>,
}

impl<T> Reservation<'_, T> {
    /// The reserved descriptor number.
    pub fn fd(&self) -> Fd {
        self.fd
    }

    /// Take the token out, leaving nothing for `Drop` to release.
    fn disarm(&mut self, table: &FdTable<T>) -> NsResult<SlotToken> {
        if !std::ptr::eq(self.table, table) {
            return Err(NsError::invalid_args(format!(
                "descriptor {} was reserved in another table",
                self.fd
            )));
        }
        let fd = self.fd;
        self.token
            .take()
            .ok_or_else(|| NsError::invalid_args(format!("descriptor {fd} is not reserved")))
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if !self.table.release_reservation(self.fd, token) {
                tracing::trace!(fd = %self.fd, "dropped reservation was already taken over");
            }
        }
    }
}

/// Table of live descriptors.
///
/// One lock guards every slot transition. It is never held across caller
/// I/O: a two-phase open reserves, drops the lock while it talks to a peer,
/// then assigns or unreserves.
pub struct FdTable<T> {
    slots: Mutex<Vec<Slot<T>>>,
}

impl<T> fmt::Debug for FdTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdTable")
            .field("slots", &"<locked>")
            .finish()
    }
}

impl<T> FdTable<T> {
    fn release_reservation(&self, fd: Fd, token: SlotToken) -> bool {
        self.slots
            .lock()
            .get_mut(fd.0)
            .is_some_and(|slot| slot.release_reservation(token))
    }
}

impl<T: Clone> Default for FdTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> FdTable<T> {
    /// Create a table with [`MAX_FD`] slots.
    pub fn new() -> Self {
        Self::build(MAX_FD)
    }

    /// Create a table with `capacity` slots.
    ///
    /// `capacity` must be between 1 and [`MAX_FD`].
    pub fn with_capacity(capacity: usize) -> NsResult<Self> {
        if capacity == 0 || capacity > MAX_FD {
            return Err(NsError::invalid_args(format!(
                "descriptor capacity {capacity} outside 1..={MAX_FD}"
            )));
        }
        Ok(Self::build(capacity))
    }

    fn build(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::new);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_occupied()).count()
    }

    fn check_min(len: usize, min: usize) -> NsResult<()> {
        if min >= len {
            return Err(NsError::invalid_args(format!(
                "descriptor {min} beyond capacity {len}"
            )));
        }
        Ok(())
    }

    fn exhausted(min: usize) -> NsError {
        tracing::warn!(min, "descriptor table exhausted");
        NsError::Exhausted
    }

    /// Reserve the lowest free descriptor at or above `min`.
    pub fn reserve(&self, min: usize) -> NsResult<Reservation<'_, T>> {
        let mut slots = self.slots.lock();
        Self::check_min(slots.len(), min)?;
        for (idx, slot) in slots.iter_mut().enumerate().skip(min) {
            if let Some(token) = slot.try_reserve() {
                return Ok(Reservation {
                    table: self,
                    fd: Fd(idx),
                    token: Some(token),
                });
            }
        }
        Err(Self::exhausted(min))
    }

    /// Fill a reservation with `obj`.
    ///
    /// Fails if the slot was taken over (for example by [`FdTable::replace`])
    /// while the reservation was outstanding; `obj` is dropped in that case.
    pub fn assign(&self, mut reservation: Reservation<'_, T>, obj: T) -> NsResult<Fd> {
        let fd = reservation.fd;
        let token = reservation.disarm(self)?;
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(fd.0)
            .ok_or_else(|| NsError::invalid_args(format!("descriptor {fd} out of range")))?;
        slot.try_fill(obj, token)
            .map(|()| fd)
            .map_err(|_| NsError::invalid_args(format!("descriptor {fd} is not reserved")))
    }

    /// Give a reservation back without filling it.
    ///
    /// Fails if the slot was taken over while the reservation was
    /// outstanding.
    pub fn unreserve(&self, mut reservation: Reservation<'_, T>) -> NsResult<()> {
        let fd = reservation.fd;
        let token = reservation.disarm(self)?;
        if self.release_reservation(fd, token) {
            Ok(())
        } else {
            Err(NsError::invalid_args(format!("descriptor {fd} is not reserved")))
        }
    }

    /// Install `obj` in the lowest free descriptor.
    pub fn bind(&self, obj: T) -> NsResult<Fd> {
        self.bind_at_min(0, obj)
    }

    /// Install `obj` in the lowest free descriptor at or above `min`.
    pub fn bind_at_min(&self, min: usize, obj: T) -> NsResult<Fd> {
        let mut slots = self.slots.lock();
        Self::check_min(slots.len(), min)?;
        let mut obj = obj;
        for (idx, slot) in slots.iter_mut().enumerate().skip(min) {
            match slot.try_set(obj) {
                Ok(()) => return Ok(Fd(idx)),
                Err(back) => obj = back,
            }
        }
        Err(Self::exhausted(min))
    }

    /// Look up the object behind `fd`.
    pub fn lookup(&self, fd: Fd) -> Option<T> {
        self.slots.lock().get(fd.0).and_then(Slot::get)
    }

    /// Install another reference to the object behind `fd` in the lowest
    /// free descriptor.
    pub fn dup(&self, fd: Fd) -> NsResult<Fd> {
        let mut slots = self.slots.lock();
        let mut obj = slots
            .get(fd.0)
            .and_then(Slot::get)
            .ok_or_else(|| NsError::invalid_args(format!("descriptor {fd} is not open")))?;
        for (idx, slot) in slots.iter_mut().enumerate() {
            match slot.try_set(obj) {
                Ok(()) => return Ok(Fd(idx)),
                Err(back) => obj = back,
            }
        }
        Err(Self::exhausted(0))
    }

    /// Remove and return the object behind `fd`.
    pub fn unbind(&self, fd: Fd) -> NsResult<T> {
        let mut slots = self.slots.lock();
        slots
            .get_mut(fd.0)
            .and_then(Slot::release)
            .ok_or_else(|| NsError::invalid_args(format!("descriptor {fd} is not open")))
    }

    /// Remove the object behind `fd`, handing it back only when `is_last`
    /// says no other reference to it remains.
    ///
    /// `is_last` runs under the table lock, and a reference that is not the
    /// last is dropped before the lock is released. Two callers removing the
    /// final two references therefore cannot both see the other's.
    pub fn unbind_if_last(&self, fd: Fd, is_last: impl FnOnce(&T) -> bool) -> NsResult<Option<T>> {
        let mut slots = self.slots.lock();
        let obj = slots
            .get_mut(fd.0)
            .and_then(Slot::release)
            .ok_or_else(|| NsError::invalid_args(format!("descriptor {fd} is not open")))?;
        Ok(is_last(&obj).then_some(obj))
    }

    /// [`FdTable::replace`], handing back the displaced object only when
    /// `is_last` holds for it. Same locking as [`FdTable::unbind_if_last`].
    pub fn replace_if_last(
        &self,
        fd: Fd,
        obj: T,
        is_last: impl FnOnce(&T) -> bool,
    ) -> NsResult<Option<T>> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(fd.0)
            .ok_or_else(|| NsError::invalid_args(format!("descriptor {fd} out of range")))?;
        Ok(slot.replace(obj).filter(is_last))
    }

    /// Install `obj` at exactly `fd`, returning whatever was open there.
    pub fn replace(&self, fd: Fd, obj: T) -> NsResult<Option<T>> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(fd.0)
            .ok_or_else(|| NsError::invalid_args(format!("descriptor {fd} out of range")))?;
        Ok(slot.replace(obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_bind_first_fit() {
        let table = FdTable::with_capacity(4).unwrap();
        assert_eq!(table.bind("a").unwrap(), Fd(0));
        assert_eq!(table.bind("b").unwrap(), Fd(1));
        assert_eq!(table.unbind(Fd(0)).unwrap(), "a");
        assert_eq!(table.bind("c").unwrap(), Fd(0));
        assert_eq!(table.lookup(Fd(1)), Some("b"));
        assert_eq!(table.occupied(), 2);
    }

    #[test]
    fn test_exhaustion_is_distinct() {
        let table = FdTable::with_capacity(2).unwrap();
        table.bind(1).unwrap();
        table.bind(2).unwrap();
        assert_eq!(table.bind(3), Err(NsError::Exhausted));
        assert!(matches!(table.reserve(0), Err(NsError::Exhausted)));
    }

    #[test]
    fn test_min_index() {
        let table = FdTable::with_capacity(8).unwrap();
        assert_eq!(table.bind_at_min(5, 'x').unwrap(), Fd(5));
        let r = table.reserve(5).unwrap();
        assert_eq!(r.fd(), Fd(6));
        table.unreserve(r).unwrap();
        assert!(matches!(
            table.bind_at_min(8, 'y'),
            Err(NsError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_reserve_assign() {
        let table = FdTable::with_capacity(4).unwrap();
        let r = table.reserve(0).unwrap();
        let fd = r.fd();

        // Reserved slots are skipped by plain binds and invisible to lookup.
        assert_eq!(table.bind(9).unwrap(), Fd(1));
        assert_eq!(table.lookup(fd), None);

        assert_eq!(table.assign(r, 7).unwrap(), fd);
        assert_eq!(table.lookup(fd), Some(7));
    }

    #[test]
    fn test_assign_after_replace_fails() {
        let table = FdTable::with_capacity(4).unwrap();
        let r = table.reserve(0).unwrap();
        assert_eq!(table.replace(r.fd(), 1).unwrap(), None);
        assert!(matches!(table.assign(r, 2), Err(NsError::InvalidArgs(_))));
        assert_eq!(table.lookup(Fd(0)), Some(1));
    }

    #[test]
    fn test_unbind_empty_is_invalid() {
        let table: FdTable<u8> = FdTable::with_capacity(2).unwrap();
        assert!(matches!(table.unbind(Fd(0)), Err(NsError::InvalidArgs(_))));
        assert!(matches!(table.unbind(Fd(5)), Err(NsError::InvalidArgs(_))));
        assert_eq!(table.lookup(Fd(5)), None);
    }

    #[test]
    fn test_dup_takes_lowest_free() {
        let table = FdTable::with_capacity(4).unwrap();
        table.bind_at_min(2, "obj").unwrap();
        assert_eq!(table.dup(Fd(2)).unwrap(), Fd(0));
        assert_eq!(table.lookup(Fd(0)), Some("obj"));
        assert!(matches!(table.dup(Fd(1)), Err(NsError::InvalidArgs(_))));
    }

    #[test]
    fn test_dropped_reservation_frees_slot() {
        let table = FdTable::<u8>::with_capacity(2).unwrap();
        let fill = |table: &FdTable<u8>| -> NsResult<Fd> {
            let r = table.reserve(0)?;
            table.bind_at_min(9, 0)?;
            table.assign(r, 1)
        };
        assert!(matches!(fill(&table), Err(NsError::InvalidArgs(_))));
        assert_eq!(table.occupied(), 0);
        assert_eq!(table.reserve(0).unwrap().fd(), Fd(0));
    }

    #[test]
    fn test_reservation_from_other_table_rejected() {
        let a = FdTable::<u8>::with_capacity(2).unwrap();
        let b = FdTable::<u8>::with_capacity(2).unwrap();
        let r = a.reserve(1).unwrap();
        assert!(matches!(b.assign(r, 3), Err(NsError::InvalidArgs(_))));
        assert_eq!(b.lookup(Fd(1)), None);
        assert_eq!(a.reserve(1).unwrap().fd(), Fd(1));
    }

    #[test]
    fn test_unbind_if_last() {
        let table = FdTable::with_capacity(4).unwrap();
        let obj = Arc::new("obj");
        let a = table.bind(Arc::clone(&obj)).unwrap();
        let b = table.dup(a).unwrap();
        drop(obj);

        let last = |o: &Arc<&str>| Arc::strong_count(o) == 1;
        assert_eq!(table.unbind_if_last(a, last).unwrap(), None);
        assert_eq!(table.unbind_if_last(b, last).unwrap(), Some(Arc::new("obj")));
        assert!(matches!(table.unbind_if_last(b, last), Err(NsError::InvalidArgs(_))));
    }

    #[test]
    fn test_replace_if_last() {
        let table = FdTable::with_capacity(4).unwrap();
        let a = table.bind(Arc::new(1)).unwrap();
        let b = table.bind(Arc::new(2)).unwrap();
        let last = |o: &Arc<i32>| Arc::strong_count(o) == 1;

        let one = table.lookup(a).unwrap();
        assert_eq!(table.replace_if_last(b, Arc::clone(&one), last).unwrap(), Some(Arc::new(2)));
        assert_eq!(table.replace_if_last(a, one, last).unwrap(), None);
        assert!(table.replace_if_last(Fd(9), Arc::new(3), last).is_err());
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(FdTable::<u8>::with_capacity(0).is_err());
        assert!(FdTable::<u8>::with_capacity(MAX_FD + 1).is_err());
        assert_eq!(FdTable::<u8>::new().capacity(), MAX_FD);
    }

    #[test]
    fn test_racing_reservations_get_distinct_numbers() {
        let table = Arc::new(FdTable::<usize>::with_capacity(64).unwrap());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let r = table.reserve(0).unwrap();
                    table.assign(r, i).unwrap()
                })
            })
            .collect();

        let mut fds: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        fds.sort();
        fds.dedup();
        assert_eq!(fds.len(), 8);
        assert_eq!(table.occupied(), 8);
    }
}
