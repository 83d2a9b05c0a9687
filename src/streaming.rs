use crate::texture::Dispose;
use log::{debug, warn};

/// Which station's imagery is resident.
///
/// At most one station is ever `Loading` or `Ready`; indices refer to the
/// layer's station registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamingState {
    Idle,
    Loading(usize),
    Ready(usize),
}

/// Identifies one load attempt.
///
/// A completion whose token was superseded by a newer [`StreamingCache::begin`]
/// is dropped without touching the bound textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadToken {
    station: usize,
    generation: u64,
}

impl LoadToken {
    pub fn station(&self) -> usize {
        self.station
    }
}

/// Owns the currently loaded per-sensor textures and the streaming state.
///
/// Textures are assembled positionally by sensor index. When a new
/// station's set is committed, every previously bound texture is disposed
/// before the new set is assigned.
pub struct StreamingCache<T> {
    state: StreamingState,
    /// State to fall back to when a load fails or is superseded.
    settled: StreamingState,
    generation: u64,
    textures: Vec<T>,
}

impl<T: Dispose> StreamingCache<T> {
    pub fn new() -> Self {
        Self {
            state: StreamingState::Idle,
            settled: StreamingState::Idle,
            generation: 0,
            textures: Vec::new(),
        }
    }

    pub fn state(&self) -> StreamingState {
        self.state
    }

    /// Textures of the last committed station, positionally by sensor.
    ///
    /// Empty until the first commit.
    pub fn textures(&self) -> &[T] {
        &self.textures
    }

    /// The station currently loading or ready, if any.
    pub fn current_station(&self) -> Option<usize> {
        match self.state {
            StreamingState::Idle => None,
            StreamingState::Loading(s) | StreamingState::Ready(s) => Some(s),
        }
    }

    /// Starts a load attempt for `station`, superseding any in flight.
    pub fn begin(&mut self, station: usize) -> LoadToken {
        self.state = StreamingState::Loading(station);
        self.generation += 1;
        debug!("loading station {station} (generation {})", self.generation);

        LoadToken {
            station,
            generation: self.generation,
        }
    }

    /// Applies a completed load.
    ///
    /// Returns false for a stale completion; its textures are disposed and
    /// the bound set is left untouched.
    pub fn commit(&mut self, token: LoadToken, mut textures: Vec<T>) -> bool {
        if token.generation != self.generation {
            debug!(
                "dropping stale textures for station {} (generation {})",
                token.station, token.generation
            );
            for texture in &mut textures {
                texture.dispose();
            }
            return false;
        }

        // Release the previous station's set before binding the new one.
        for texture in &mut self.textures {
            texture.dispose();
        }
        self.textures = textures;
        self.state = StreamingState::Ready(token.station);
        self.settled = self.state;
        true
    }

    /// Records a failed load attempt.
    ///
    /// Falls back to the last settled state so the previously committed
    /// imagery stays bound and the next tick retries the same station.
    pub fn abort(&mut self, token: LoadToken) {
        if token.generation != self.generation {
            return;
        }

        warn!("load failed for station {}, keeping {:?}", token.station, self.settled);
        self.state = self.settled;
    }
}

impl<T: Dispose> Default for StreamingCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingTexture {
        disposals: Rc<Cell<usize>>,
        disposed: bool,
    }

    impl CountingTexture {
        fn new(disposals: &Rc<Cell<usize>>) -> Self {
            Self {
                disposals: Rc::clone(disposals),
                disposed: false,
            }
        }
    }

    impl Dispose for CountingTexture {
        fn dispose(&mut self) {
            // Double disposal would double-count.
            assert!(!self.disposed);
            self.disposed = true;
            self.disposals.set(self.disposals.get() + 1);
        }
    }

    fn set(disposals: &Rc<Cell<usize>>, n: usize) -> Vec<CountingTexture> {
        (0..n).map(|_| CountingTexture::new(disposals)).collect()
    }

    #[test]
    fn ready_only_after_commit() {
        let disposals = Rc::new(Cell::new(0));
        let mut cache = StreamingCache::new();
        assert_eq!(cache.state(), StreamingState::Idle);

        let token = cache.begin(0);
        assert_eq!(cache.state(), StreamingState::Loading(0));

        assert!(cache.commit(token, set(&disposals, 2)));
        assert_eq!(cache.state(), StreamingState::Ready(0));
        assert_eq!(cache.textures().len(), 2);
    }

    #[test]
    fn switching_stations_releases_one_set_per_switch() {
        let disposals = Rc::new(Cell::new(0));
        let mut cache = StreamingCache::new();

        for station in 0..4 {
            let token = cache.begin(station);
            assert!(cache.commit(token, set(&disposals, 2)));
        }

        // Four loads, three replaced sets of two textures each.
        assert_eq!(disposals.get(), 6);
    }

    #[test]
    fn stale_completion_is_dropped_and_disposed() {
        let disposals = Rc::new(Cell::new(0));
        let mut cache = StreamingCache::new();

        let stale = cache.begin(0);
        let current = cache.begin(1);

        assert!(!cache.commit(stale, set(&disposals, 2)));
        assert_eq!(cache.state(), StreamingState::Loading(1));
        // The late set was released, nothing was bound.
        assert_eq!(disposals.get(), 2);
        assert!(cache.textures().is_empty());

        assert!(cache.commit(current, set(&disposals, 2)));
        assert_eq!(cache.state(), StreamingState::Ready(1));
    }

    #[test]
    fn abort_falls_back_to_the_previous_ready_station() {
        let disposals = Rc::new(Cell::new(0));
        let mut cache = StreamingCache::new();

        let token = cache.begin(0);
        assert!(cache.commit(token, set(&disposals, 2)));

        let failed = cache.begin(1);
        cache.abort(failed);

        assert_eq!(cache.state(), StreamingState::Ready(0));
        assert_eq!(cache.textures().len(), 2);
        assert_eq!(disposals.get(), 0);
    }

    #[test]
    fn abort_of_a_superseded_attempt_is_ignored() {
        let disposals = Rc::new(Cell::new(0));
        let mut cache = StreamingCache::<CountingTexture>::new();

        let stale = cache.begin(0);
        let _current = cache.begin(1);
        cache.abort(stale);

        assert_eq!(cache.state(), StreamingState::Loading(1));
        assert_eq!(disposals.get(), 0);
    }
}
