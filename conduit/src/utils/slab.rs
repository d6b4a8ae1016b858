/// A stable handle to a value stored in a [`Slab`].
///
/// A `Key` is a slot index paired with the generation the slot had when the
/// value was inserted. Once the value is removed the slot's generation is
/// bumped, so stale keys never alias a value inserted later into the same
/// slot.
///
/// Keys round-trip through a `u64` so they can be used directly as poller
/// tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    /// Packs the key into a poller token.
    pub(crate) fn to_token(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpacks a poller token produced by [`to_token`](Self::to_token).
    pub(crate) fn from_token(token: u64) -> Self {
        Self {
            index: token as u32,
            generation: (token >> 32) as u32,
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A generational slab allocator.
///
/// A `Slab` stores values of type `T` in a contiguous array and hands out
/// [`Key`]s whose slots are reused after removal. Unlike a plain index, a
/// key of a removed value keeps failing lookups even after its slot has been
/// reused.
///
/// The slab exclusively owns its values: [`remove`](Self::remove) is the
/// only way a value leaves it.
pub(crate) struct Slab<T> {
    /// Storage for items; `None` marks a free slot.
    slots: Vec<Slot<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a new `Slab` with room for `size` values before growing.
    pub(crate) fn new(size: usize) -> Self {
        let slots = (0..size)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();
        let free = (0..size as u32).rev().collect();

        Self {
            slots,
            free,
            len: 0,
        }
    }

    /// Inserts a value and returns its key.
    ///
    /// If a free slot is available it is reused; otherwise the slab grows
    /// exponentially.
    pub(crate) fn insert(&mut self, item: T) -> Key {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                let len = self.slots.len();
                let new_len = if len == 0 { 1 } else { 2 * len };

                self.slots.extend((len..new_len).map(|_| Slot {
                    generation: 0,
                    value: None,
                }));
                self.free.extend(((len + 1) as u32..new_len as u32).rev());

                len as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.value = Some(item);
        self.len += 1;

        Key {
            index,
            generation: slot.generation,
        }
    }

    /// Removes and returns the value stored under `key`.
    ///
    /// Returns `None` if the key is stale or was never issued by this slab.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;

        if slot.generation != key.generation {
            return None;
        }

        let item = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;

        Some(item)
    }

    /// Returns a reference to the value under `key`, if it is still live.
    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        let slot = self.slots.get(key.index as usize)?;

        if slot.generation != key.generation {
            return None;
        }

        slot.value.as_ref()
    }

    /// Returns a mutable reference to the value under `key`, if it is still live.
    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index as usize)?;

        if slot.generation != key.generation {
            return None;
        }

        slot.value.as_mut()
    }

    /// Returns mutable references to two distinct live values.
    ///
    /// Returns `None` if either key is stale or both keys name the same slot.
    pub(crate) fn get2_mut(&mut self, a: Key, b: Key) -> Option<(&mut T, &mut T)> {
        if a.index == b.index {
            return None;
        }

        let (lo, hi, swapped) = if a.index < b.index {
            (a, b, false)
        } else {
            (b, a, true)
        };

        if hi.index as usize >= self.slots.len() {
            return None;
        }

        let (head, tail) = self.slots.split_at_mut(hi.index as usize);
        let lo_slot = head.get_mut(lo.index as usize)?;
        let hi_slot = tail.first_mut()?;

        if lo_slot.generation != lo.generation || hi_slot.generation != hi.generation {
            return None;
        }

        let lo_value = lo_slot.value.as_mut()?;
        let hi_value = hi_slot.value.as_mut()?;

        if swapped {
            Some((hi_value, lo_value))
        } else {
            Some((lo_value, hi_value))
        }
    }

    /// Returns `true` if `key` names a live value.
    #[cfg(test)]
    pub(crate) fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Number of live values.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Iterates over the keys and values of all live entries.
    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Key {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}
