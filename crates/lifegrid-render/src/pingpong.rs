// SPDX-License-Identifier: CEPL-1.0
//! Two slots that alternate between "read" (latest generation) and
//! "write" (generation being produced) roles.

/// Slot indices for one automaton tick. `read != write` always.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickPlan {
    pub read: usize,
    pub write: usize,
}

#[derive(Debug)]
pub struct PingPong<T> {
    slots: [T; 2],
    current: usize,
}

impl<T> PingPong<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [a, b],
            current: 0,
        }
    }

    /// Index of the slot holding the latest generation.
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.current]
    }

    pub fn next(&self) -> &T {
        &self.slots[1 - self.current]
    }

    pub fn get(&self, index: usize) -> &T {
        &self.slots[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut T {
        &mut self.slots[index]
    }

    /// Both slots mutably, as `(read, write)` for `plan`.
    pub fn split_mut(&mut self, plan: TickPlan) -> (&mut T, &mut T) {
        let [a, b] = &mut self.slots;
        if plan.read == 0 {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Roles for the next tick. Nothing changes until [`commit`](Self::commit).
    pub fn plan(&self) -> TickPlan {
        TickPlan {
            read: self.current,
            write: 1 - self.current,
        }
    }

    /// Makes the written slot the latest generation. Ignored for a stale plan.
    pub fn commit(&mut self, plan: TickPlan) -> bool {
        if plan.read != self.current {
            return false;
        }
        self.current = plan.write;
        true
    }

    /// Exchanges roles. Slot contents are untouched.
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_and_write_never_alias() {
        let mut pp = PingPong::new("a", "b");
        for _ in 0..5 {
            let plan = pp.plan();
            assert_ne!(plan.read, plan.write);
            let (r, w) = pp.split_mut(plan);
            assert_ne!(*r, *w);
            assert!(pp.commit(plan));
        }
    }

    #[test]
    fn swap_twice_restores_roles_not_data() {
        let mut pp = PingPong::new(vec![1u8], vec![2u8]);
        pp.current_mut().push(9);
        let before = pp.plan();
        pp.swap();
        assert_eq!(pp.current(), &vec![2u8]);
        pp.swap();
        assert_eq!(pp.plan(), before);
        assert_eq!(pp.current(), &vec![1u8, 9]);
        assert_eq!(pp.next(), &vec![2u8]);
    }

    #[test]
    fn written_slot_becomes_current() {
        let mut pp = PingPong::new(0, 0);
        let plan = pp.plan();
        *pp.split_mut(plan).1 = 7;
        assert!(pp.commit(plan));
        assert_eq!(*pp.current(), 7);
        assert_eq!(pp.current_index(), plan.write);
    }

    #[test]
    fn stale_plan_is_rejected() {
        let mut pp = PingPong::new((), ());
        let plan = pp.plan();
        pp.swap();
        assert!(!pp.commit(plan));
        assert_eq!(pp.current_index(), 1);
    }

    #[test]
    fn abandoned_plan_keeps_roles() {
        let pp = PingPong::new('x', 'y');
        let _ = pp.plan();
        assert_eq!(*pp.current(), 'x');
    }
}
