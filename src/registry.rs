//! 连接注册表：带代数的槽位竞技场 + 侵入式有序链表
//! Connection registry: generational slot arena + intrusive ordered list
//!
//! 注册表以插入顺序保存条目，支持O(1)追加、O(1)按键删除以及向前遍历。
//! 被释放的槽位会以递增的代数重用，因此过期的键永远不会指向更新的条目。
//!
//! The registry keeps entries in insertion order and supports O(1) append,
//! O(1) removal by key and forward iteration. Freed slots are reused with a
//! bumped generation, so a stale key can never designate a newer entry.

use std::fmt;

/// A stable handle to an entry of a [`Registry`].
///
/// 指向 [`Registry`] 中条目的稳定句柄。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    index: u32,
    generation: u32,
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

#[derive(Debug)]
struct Entry<T> {
    value: T,
    prev: Option<u32>,
    next: Option<u32>,
}

/// An insertion-ordered collection addressed by generational keys.
///
/// 通过代数键寻址、保持插入顺序的集合。
#[derive(Debug)]
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    /// Creates an empty registry.
    /// 创建一个空注册表。
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `value` at the end of the order and returns its key.
    ///
    /// 将 `value` 追加到顺序末尾并返回其键。
    pub fn push_back(&mut self, value: T) -> ConnectionKey {
        let entry = Entry {
            value,
            prev: self.tail,
            next: None,
        };

        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                index
            }
            None => {
                // 槽位耗尽是致命的内存问题
                // Running out of slots is a fatal resource failure
                #[allow(clippy::expect_used)]
                let index = u32::try_from(self.slots.len()).expect("registry exceeded u32::MAX slots");
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                index
            }
        };

        match self.tail {
            Some(tail) => self.entry_mut(tail).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        ConnectionKey {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Removes the entry designated by `key`. Stale keys return `None`.
    ///
    /// 删除 `key` 指定的条目。过期的键返回 `None`。
    pub fn remove(&mut self, key: ConnectionKey) -> Option<T> {
        if !self.contains(key) {
            return None;
        }
        let slot = &mut self.slots[key.index as usize];
        let entry = slot.entry.take()?;
        // 代数递增，使旧键失效
        // Bump the generation so the old key goes stale
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);

        match entry.prev {
            Some(prev) => self.entry_mut(prev).next = entry.next,
            None => self.head = entry.next,
        }
        match entry.next {
            Some(next) => self.entry_mut(next).prev = entry.prev,
            None => self.tail = entry.prev,
        }
        self.len -= 1;

        Some(entry.value)
    }

    /// Removes and returns the first entry in order.
    /// 删除并返回顺序中的第一个条目。
    pub fn pop_front(&mut self) -> Option<(ConnectionKey, T)> {
        let key = self.front()?;
        self.remove(key).map(|value| (key, value))
    }

    pub fn contains(&self, key: ConnectionKey) -> bool {
        self.slots
            .get(key.index as usize)
            .is_some_and(|slot| slot.generation == key.generation && slot.entry.is_some())
    }

    pub fn get(&self, key: ConnectionKey) -> Option<&T> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_ref().map(|entry| &entry.value)
    }

    /// The key of the first entry in order, if any.
    /// 顺序中第一个条目的键（如果有）。
    pub fn front(&self) -> Option<ConnectionKey> {
        self.head.map(|index| self.key_at(index))
    }

    /// The key following `key` in order. Returns `None` at the end, or when
    /// `key` is stale.
    ///
    /// 顺序中 `key` 之后的键。到达末尾或 `key` 已过期时返回 `None`。
    pub fn next(&self, key: ConnectionKey) -> Option<ConnectionKey> {
        if !self.contains(key) {
            return None;
        }
        let next = self.slots[key.index as usize].entry.as_ref()?.next?;
        Some(self.key_at(next))
    }

    /// Iterates over `(key, value)` pairs in insertion order.
    /// 按插入顺序遍历 `(key, value)` 对。
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            registry: self,
            cursor: self.head,
        }
    }

    fn key_at(&self, index: u32) -> ConnectionKey {
        ConnectionKey {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn entry_mut(&mut self, index: u32) -> &mut Entry<T> {
        match self.slots[index as usize].entry.as_mut() {
            Some(entry) => entry,
            None => unreachable!("linked slot {index} is vacant"),
        }
    }
}

/// Insertion-order iterator over a [`Registry`].
/// [`Registry`] 的插入顺序迭代器。
pub struct Iter<'a, T> {
    registry: &'a Registry<T>,
    cursor: Option<u32>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (ConnectionKey, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let slot = &self.registry.slots[index as usize];
        let entry = slot.entry.as_ref()?;
        self.cursor = entry.next;
        Some((
            ConnectionKey {
                index,
                generation: slot.generation,
            },
            &entry.value,
        ))
    }
}
