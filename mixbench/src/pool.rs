//! The set of objects currently live in the target store.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::generator::Object;

#[derive(Debug)]
struct PoolInner {
    objects: Vec<Object>,
    index: HashMap<String, usize>,
    rng: SmallRng,
}

impl PoolInner {
    fn random_index(&mut self) -> Result<usize> {
        if self.objects.is_empty() {
            return Err(Error::PoolExhausted);
        }
        Ok(self.rng.random_range(0..self.objects.len()))
    }
}

/// Objects that have been written to the store and not yet deleted.
///
/// Selection draws uniformly among the live objects. Every method takes the pool's single lock
/// once, so a pop can never hand the same object to two callers.
#[derive(Debug)]
pub struct ObjectPool(Mutex<PoolInner>);

impl ObjectPool {
    /// Creates an empty pool with room for `capacity` objects.
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Mutex::new(PoolInner {
            objects: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            rng: SmallRng::seed_from_u64(rand::random()),
        }))
    }

    /// Registers an object. An object with the same name is replaced.
    pub fn add(&self, object: Object) {
        let mut inner = self.0.lock().unwrap();
        if let Some(&i) = inner.index.get(&object.name) {
            inner.objects[i] = object;
            return;
        }
        let i = inner.objects.len();
        inner.index.insert(object.name.clone(), i);
        inner.objects.push(object);
    }

    /// Returns a copy of a uniformly chosen live object.
    ///
    /// Fails with [`Error::PoolExhausted`] if the pool is empty.
    pub fn random(&self) -> Result<Object> {
        let mut inner = self.0.lock().unwrap();
        let i = inner.random_index()?;
        Ok(inner.objects[i].clone())
    }

    /// Removes and returns a uniformly chosen live object.
    ///
    /// Fails with [`Error::PoolExhausted`] if the pool is empty.
    pub fn pop_random(&self) -> Result<Object> {
        let mut inner = self.0.lock().unwrap();
        let i = inner.random_index()?;

        let object = inner.objects.swap_remove(i);
        inner.index.remove(&object.name);
        if let Some(moved) = inner.objects.get(i) {
            let name = moved.name.clone();
            inner.index.insert(name, i);
        }

        Ok(object)
    }

    /// Returns `true` if an object with this name is live.
    pub fn contains(&self, name: &str) -> bool {
        self.0.lock().unwrap().index.contains_key(name)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().objects.len()
    }

    /// Returns `true` if there are no live objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all objects, returning them.
    pub fn drain(&self) -> Vec<Object> {
        let mut inner = self.0.lock().unwrap();
        inner.index.clear();
        std::mem::take(&mut inner.objects)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    use super::*;
    use crate::generator::CONTENT_TYPE;

    fn object(name: &str, size: u64) -> Object {
        Object {
            name: name.into(),
            size,
            content_type: CONTENT_TYPE.into(),
            prefix: None,
        }
    }

    #[test]
    fn empty_pool_fails_explicitly() {
        let pool = ObjectPool::with_capacity(0);
        assert!(matches!(pool.random(), Err(Error::PoolExhausted)));
        assert!(matches!(pool.pop_random(), Err(Error::PoolExhausted)));
    }

    #[test]
    fn add_replaces_same_name() {
        let pool = ObjectPool::with_capacity(2);
        pool.add(object("a", 1));
        pool.add(object("a", 2));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.random().unwrap().size, 2);
    }

    #[test]
    fn pop_keeps_index_consistent() {
        let pool = ObjectPool::with_capacity(10);
        for i in 0..10 {
            pool.add(object(&format!("obj{i}"), i));
        }

        let mut popped = HashSet::new();
        while let Ok(object) = pool.pop_random() {
            assert!(!pool.contains(&object.name));
            assert!(popped.insert(object.name));
            // every remaining name still resolves to its object
            let inner = pool.0.lock().unwrap();
            for (name, &i) in &inner.index {
                assert_eq!(&inner.objects[i].name, name);
            }
        }
        assert_eq!(popped.len(), 10);
        assert!(pool.is_empty());
    }

    #[test]
    fn random_selection_covers_all_objects() {
        let pool = ObjectPool::with_capacity(4);
        for name in ["a", "b", "c", "d"] {
            pool.add(object(name, 1));
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        for _ in 0..4000 {
            *seen.entry(pool.random().unwrap().name).or_default() += 1;
        }
        assert_eq!(seen.len(), 4);
        for count in seen.values() {
            assert!((700..1300).contains(count), "skewed selection: {seen:?}");
        }
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn concurrent_pops_are_exclusive() {
        const N: usize = 1000;
        let pool = Arc::new(ObjectPool::with_capacity(N));
        for i in 0..N {
            pool.add(object(&format!("obj{i}"), 1));
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let mut names = Vec::new();
                    while let Ok(object) = pool.pop_random() {
                        names.push(object.name);
                    }
                    names
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for name in handle.join().unwrap() {
                assert!(all.insert(name), "object popped twice");
            }
        }
        assert_eq!(all.len(), N);
    }
}
