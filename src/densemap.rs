//! An arena keyed by dense integer handles.
//!
//! Nodes of the package store are never removed, so a handle stays valid for
//! the lifetime of the store and edges can be plain integers.

use std::marker::PhantomData;

pub trait Index: From<usize> + Copy {
    fn index(&self) -> usize;
}

/// Wraps a Vec<V> to provide typed keys.
pub struct DenseMap<K, V> {
    vec: Vec<V>,
    key_type: PhantomData<K>,
}

impl<K, V> Default for DenseMap<K, V> {
    fn default() -> Self {
        DenseMap {
            vec: Vec::new(),
            key_type: PhantomData,
        }
    }
}

impl<K: Index, V> std::ops::Index<K> for DenseMap<K, V> {
    type Output = V;

    fn index(&self, k: K) -> &Self::Output {
        &self.vec[k.index()]
    }
}

impl<K: Index, V> std::ops::IndexMut<K> for DenseMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut Self::Output {
        &mut self.vec[k.index()]
    }
}

impl<K: Index, V> DenseMap<K, V> {
    pub fn lookup(&self, k: K) -> Option<&V> {
        self.vec.get(k.index())
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }

    pub fn push(&mut self, val: V) -> K {
        let id = K::from(self.vec.len());
        self.vec.push(val);
        id
    }

    pub fn all_ids(&self) -> impl Iterator<Item = K> {
        (0..self.vec.len()).map(K::from)
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.vec.iter().enumerate().map(|(i, v)| (K::from(i), v))
    }

    /// Borrow two distinct entries mutably at once.
    pub fn pair_mut(&mut self, a: K, b: K) -> (&mut V, &mut V) {
        let (a, b) = (a.index(), b.index());
        assert_ne!(a, b, "pair_mut on a single entry");
        if a < b {
            let (lo, hi) = self.vec.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.vec.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Id(usize);
    impl Index for Id {
        fn index(&self) -> usize {
            self.0
        }
    }
    impl From<usize> for Id {
        fn from(u: usize) -> Id {
            Id(u)
        }
    }

    #[test]
    fn pair_mut_either_order() {
        let mut m: DenseMap<Id, u32> = DenseMap::default();
        let a = m.push(1);
        let b = m.push(2);
        {
            let (x, y) = m.pair_mut(b, a);
            *x += 10;
            *y += 20;
        }
        assert_eq!(m[a], 21);
        assert_eq!(m[b], 12);
        assert_eq!(m.all_ids().collect::<Vec<_>>(), vec![a, b]);
    }
}
