//! Clothing items and the per-participant wardrobe.
//!
//! A wardrobe has one bounded shelf per clothing category plus the
//! unbounded [`Category::Extra`] shelf. Items that do not fit their own
//! shelf land in `Extra`, so adding never fails.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Item types
// ---------------------------------------------------------------------------

/// Wardrobe categories. `Extra` is the overflow shelf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Shirt,
    Pants,
    Sweater,
    Jacket,
    Extra,
}

impl Category {
    /// The bounded categories, in shelf order.
    pub const SHELVED: [Category; 4] = [Self::Shirt, Self::Pants, Self::Sweater, Self::Jacket];

    /// Returns `true` for the unbounded overflow category.
    pub fn is_overflow(self) -> bool {
        matches!(self, Self::Extra)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Shirt => "Shirt",
            Self::Pants => "Pants",
            Self::Sweater => "Sweater",
            Self::Jacket => "Jacket",
            Self::Extra => "Extra",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fiber {
    Natural,
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    New,
    SecondHand,
}

/// A clothing card, as sold in the market and kept in wardrobes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClothingItem {
    pub category: Category,
    pub material: String,
    pub fiber: Fiber,
    pub condition: Condition,
    pub price: u32,
    /// Score awarded when the item is bought.
    pub value: u32,
}

// ---------------------------------------------------------------------------
// InventoryLayout
// ---------------------------------------------------------------------------

/// Shelf capacities for the bounded categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLayout {
    pub shirt: usize,
    pub pants: usize,
    pub sweater: usize,
    pub jacket: usize,
}

impl InventoryLayout {
    /// Capacity of `category`; `None` means unbounded.
    pub fn capacity(&self, category: Category) -> Option<usize> {
        match category {
            Category::Shirt => Some(self.shirt),
            Category::Pants => Some(self.pants),
            Category::Sweater => Some(self.sweater),
            Category::Jacket => Some(self.jacket),
            Category::Extra => None,
        }
    }
}

impl Default for InventoryLayout {
    fn default() -> Self {
        Self {
            shirt: 3,
            pants: 2,
            sweater: 2,
            jacket: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// One category's items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shelf {
    pub category: Category,
    pub capacity: Option<usize>,
    pub items: Vec<ClothingItem>,
}

impl Shelf {
    fn is_full(&self) -> bool {
        self.capacity.is_some_and(|cap| self.items.len() >= cap)
    }
}

/// A participant's wardrobe.
///
/// Invariant: no bounded shelf ever holds more than its capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    shelves: Vec<Shelf>,
    /// Shelf of every held item, oldest first. Items within a shelf are
    /// also kept oldest first, so the n-th occurrence of a category here
    /// matches the n-th item on that shelf.
    acquired: Vec<Category>,
}

impl Inventory {
    /// An empty wardrobe with the given capacities.
    pub fn new(layout: &InventoryLayout) -> Self {
        let shelves = Category::SHELVED
            .iter()
            .copied()
            .chain(std::iter::once(Category::Extra))
            .map(|category| Shelf {
                category,
                capacity: layout.capacity(category),
                items: Vec::new(),
            })
            .collect();
        Self {
            shelves,
            acquired: Vec::new(),
        }
    }

    /// Stores `item` on its own shelf, or on `Extra` when that shelf is
    /// full. Returns the category actually used.
    pub fn add(&mut self, item: ClothingItem) -> Category {
        let target = match self.shelf(item.category) {
            Some(shelf) if !shelf.is_full() => item.category,
            _ => Category::Extra,
        };
        self.shelf_mut(target).items.push(item);
        self.acquired.push(target);
        target
    }

    /// Free slots on `category`'s shelf; `None` for the unbounded shelf.
    pub fn remaining(&self, category: Category) -> Option<usize> {
        let shelf = self.shelf(category)?;
        shelf
            .capacity
            .map(|cap| cap.saturating_sub(shelf.items.len()))
    }

    /// Returns `true` when every bounded shelf is at capacity.
    pub fn is_full(&self) -> bool {
        self.shelves
            .iter()
            .filter(|s| !s.category.is_overflow())
            .all(Shelf::is_full)
    }

    /// Removes and returns the item with the lowest value. Ties go to
    /// the item found first in shelf order.
    pub fn remove_lowest_value(&mut self) -> Option<ClothingItem> {
        let (shelf_idx, item_idx) = self
            .shelves
            .iter()
            .enumerate()
            .flat_map(|(s, shelf)| {
                shelf
                    .items
                    .iter()
                    .enumerate()
                    .map(move |(i, item)| (s, i, item.value))
            })
            .min_by_key(|&(_, _, value)| value)
            .map(|(s, i, _)| (s, i))?;

        let category = self.shelves[shelf_idx].category;
        let item = self.shelves[shelf_idx].items.remove(item_idx);
        self.forget(category, item_idx);
        Some(item)
    }

    /// Removes and returns the most recently acquired item.
    pub fn take_latest(&mut self) -> Option<ClothingItem> {
        let category = self.acquired.pop()?;
        self.shelf_mut(category).items.pop()
    }

    /// Number of items held, overflow included.
    pub fn len(&self) -> usize {
        self.acquired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acquired.is_empty()
    }

    /// The shelf for `category`.
    pub fn shelf(&self, category: Category) -> Option<&Shelf> {
        self.shelves.iter().find(|s| s.category == category)
    }

    /// All held items, in shelf order.
    pub fn items(&self) -> impl Iterator<Item = &ClothingItem> {
        self.shelves.iter().flat_map(|s| s.items.iter())
    }

    /// Sum of item values.
    pub fn total_value(&self) -> u32 {
        self.items().map(|i| i.value).sum()
    }

    fn shelf_mut(&mut self, category: Category) -> &mut Shelf {
        let idx = self
            .shelves
            .iter()
            .position(|s| s.category == category)
            .unwrap_or(self.shelves.len() - 1);
        &mut self.shelves[idx]
    }

    /// Drops the `nth` acquisition record for `category`.
    fn forget(&mut self, category: Category, nth: usize) {
        let pos = self
            .acquired
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == category)
            .nth(nth)
            .map(|(pos, _)| pos);
        if let Some(pos) = pos {
            self.acquired.remove(pos);
        }
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new(&InventoryLayout::default())
    }
}
