//! Minimal in-memory EPG model: the data the scrape worker mutates.
//!
//! Broadcasts, episodes, brands, and seasons form a graph with
//! back-references (an episode points at its brand and season) that
//! would otherwise need `Rc<RefCell<_>>` cycles. Instead the graph is
//! an arena of stable `u32` IDs: back-references are lookups, not
//! owning pointers.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Episode numbering, composed across brand/season/episode/part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpisodeNumber {
    pub season_number: u32,
    pub season_count: u32,
    pub episode_number: u32,
    pub episode_count: u32,
    pub part_number: u32,
    pub part_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Brand {
    pub title: String,
    pub summary: String,
    pub season_count: u32,
    pub image: String,
    /// Language tag of `title`/`summary`, as reported by the scraper.
    pub language: String,
}

#[derive(Debug, Clone, Default)]
pub struct Season {
    pub summary: String,
    pub number: u32,
    pub episode_count: u32,
    pub image: String,
    /// Language tag of `summary`, as reported by the scraper.
    pub language: String,
}

#[derive(Debug, Clone, Default)]
pub struct Episode {
    pub title: String,
    pub subtitle: String,
    pub summary: String,
    pub description: String,
    pub image: String,
    pub age_rating: u32,
    pub star_rating: u32,
    pub first_aired: i64,
    pub epnum: EpisodeNumber,
    pub brand: Option<u32>,
    pub season: Option<u32>,
    /// Language tag of `title`/`subtitle`/`summary`/`description`, as
    /// reported by the scraper.
    pub language: String,
}

#[derive(Debug, Clone, Default)]
pub struct Broadcast {
    pub channel_name: String,
    pub title: String,
    pub description: String,
    pub summary: String,
    pub content_type: u32,
    pub start: i64,
    pub stop: i64,
    pub scraped: i64,
    pub updated: i64,
    pub in_progress: bool,
    pub completed: bool,
    pub episode: Option<u32>,
}

#[derive(Default)]
struct Arena {
    broadcasts: HashMap<u32, Broadcast>,
    episodes: HashMap<u32, Episode>,
    brands: HashMap<u32, Brand>,
    seasons: HashMap<u32, Season>,
    next_id: u32,
}

/// Single process-wide EPG arena, guarded by one lock.
#[derive(Default)]
pub struct EpgModel {
    arena: Mutex<Arena>,
}

impl EpgModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(arena: &mut Arena) -> u32 {
        arena.next_id += 1;
        arena.next_id
    }

    /// Creates a broadcast with a freshly-allocated episode attached,
    /// returning the broadcast's stable ID. Test/demo helper — a real
    /// deployment populates the arena from broadcast-table parsing.
    pub fn insert_broadcast(&self, mut broadcast: Broadcast) -> u32 {
        let mut arena = self.arena.lock();
        let episode_id = Self::alloc_id(&mut arena);
        arena.episodes.insert(episode_id, Episode::default());
        broadcast.episode = Some(episode_id);
        let broadcast_id = Self::alloc_id(&mut arena);
        arena.broadcasts.insert(broadcast_id, broadcast);
        broadcast_id
    }

    pub fn with_broadcast<R>(&self, id: u32, f: impl FnOnce(&Broadcast) -> R) -> Option<R> {
        self.arena.lock().broadcasts.get(&id).map(f)
    }

    pub fn set_in_progress(&self, id: u32, value: bool) {
        if let Some(b) = self.arena.lock().broadcasts.get_mut(&id) {
            b.in_progress = value;
        }
    }

    pub fn set_scraped(&self, id: u32, at: i64) {
        if let Some(b) = self.arena.lock().broadcasts.get_mut(&id) {
            b.scraped = at;
        }
    }

    pub fn set_completed(&self, id: u32, value: bool) {
        if let Some(b) = self.arena.lock().broadcasts.get_mut(&id) {
            b.completed = value;
        }
    }

    #[must_use]
    pub fn is_in_progress(&self, id: u32) -> bool {
        self.arena
            .lock()
            .broadcasts
            .get(&id)
            .is_some_and(|b| b.in_progress)
    }

    #[must_use]
    pub fn is_completed(&self, id: u32) -> bool {
        self.arena
            .lock()
            .broadcasts
            .get(&id)
            .is_some_and(|b| b.completed)
    }

    /// Ensures the episode attached to `broadcast_id` has a brand,
    /// allocating one if absent. Returns the brand ID.
    pub fn ensure_brand(&self, broadcast_id: u32) -> Option<u32> {
        let mut arena = self.arena.lock();
        let episode_id = arena.broadcasts.get(&broadcast_id)?.episode?;
        if let Some(brand) = arena.episodes.get(&episode_id).and_then(|e| e.brand) {
            return Some(brand);
        }
        let brand_id = Self::alloc_id(&mut arena);
        arena.brands.insert(brand_id, Brand::default());
        arena.episodes.get_mut(&episode_id)?.brand = Some(brand_id);
        Some(brand_id)
    }

    pub fn ensure_season(&self, broadcast_id: u32) -> Option<u32> {
        let mut arena = self.arena.lock();
        let episode_id = arena.broadcasts.get(&broadcast_id)?.episode?;
        if let Some(season) = arena.episodes.get(&episode_id).and_then(|e| e.season) {
            return Some(season);
        }
        let season_id = Self::alloc_id(&mut arena);
        arena.seasons.insert(season_id, Season::default());
        arena.episodes.get_mut(&episode_id)?.season = Some(season_id);
        Some(season_id)
    }

    pub fn episode_id_for(&self, broadcast_id: u32) -> Option<u32> {
        self.arena.lock().broadcasts.get(&broadcast_id)?.episode
    }

    pub fn with_episode_mut<R>(&self, id: u32, f: impl FnOnce(&mut Episode) -> R) -> Option<R> {
        self.arena.lock().episodes.get_mut(&id).map(f)
    }

    pub fn with_brand_mut<R>(&self, id: u32, f: impl FnOnce(&mut Brand) -> R) -> Option<R> {
        self.arena.lock().brands.get_mut(&id).map(f)
    }

    pub fn with_season_mut<R>(&self, id: u32, f: impl FnOnce(&mut Season) -> R) -> Option<R> {
        self.arena.lock().seasons.get_mut(&id).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_broadcast_allocates_an_episode() {
        let model = EpgModel::new();
        let id = model.insert_broadcast(Broadcast { title: "News".into(), ..Default::default() });
        assert!(model.episode_id_for(id).is_some());
    }

    #[test]
    fn ensure_brand_is_idempotent() {
        let model = EpgModel::new();
        let id = model.insert_broadcast(Broadcast::default());
        let brand1 = model.ensure_brand(id).unwrap();
        let brand2 = model.ensure_brand(id).unwrap();
        assert_eq!(brand1, brand2);
    }

    #[test]
    fn in_progress_flag_round_trips() {
        let model = EpgModel::new();
        let id = model.insert_broadcast(Broadcast::default());
        assert!(!model.is_in_progress(id));
        model.set_in_progress(id, true);
        assert!(model.is_in_progress(id));
        model.set_in_progress(id, false);
        assert!(!model.is_in_progress(id));
    }

    #[test]
    fn completed_flag_round_trips() {
        let model = EpgModel::new();
        let id = model.insert_broadcast(Broadcast::default());
        assert!(!model.is_completed(id));
        model.set_completed(id, true);
        assert!(model.is_completed(id));
        model.set_completed(id, false);
        assert!(!model.is_completed(id));
    }
}
