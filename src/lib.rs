//! Crossword grid filling as constraint satisfaction.
//!
//! Every slot in the grid is a variable whose domain is the set of dictionary
//! words of the slot's length, and every crossing requires the two slots
//! involved to agree on the shared letter. Filling combines AC-3 constraint
//! propagation with backtracking search ordered by the usual CSP heuristics.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{Debug, Formatter};

use bit_set::BitSet;
use instant::{Duration, Instant};
use log::{debug, trace};
use smallvec::{smallvec, SmallVec};
use thiserror::Error;

/// The expected maximum number of slots appearing in a grid.
pub const MAX_SLOT_COUNT: usize = 256;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// An identifier for a given letter or whatever, based on its index in the
/// puzzle's `glyphs` field.
pub type GlyphId = usize;

/// An identifier for a given slot, based on its index in the puzzle's `slots`
/// field, which also corresponds to an index in the domain store.
pub type SlotId = usize;

/// An identifier for a given word, based on its index in the puzzle's `words`
/// field (within the relevant length bucket).
pub type WordId = usize;

/// Zero-indexed (row, col) coords for a cell in the grid, with row 0 at the
/// top.
pub type GridCoord = (usize, usize);

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Across,
    Down,
}

/// A dictionary word that can be chosen for a slot of matching length.
#[derive(Debug, Clone)]
pub struct Word {
    pub string: String,
    pub glyphs: SmallVec<[GlyphId; MAX_SLOT_LENGTH]>,
}

/// A crossing between one slot and another, referencing the other slot's id
/// and the location of the shared cell within the other slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    pub other_slot_id: SlotId,
    pub other_slot_cell: usize,
}

/// A single word-length run in the grid. Immutable once the puzzle is built.
#[derive(Debug)]
pub struct Slot {
    pub id: SlotId,
    pub start: GridCoord,
    pub direction: Direction,
    pub length: usize,
    /// One entry per cell: the crossing through that cell, if any.
    pub crossings: SmallVec<[Option<Crossing>; MAX_SLOT_LENGTH]>,
}

impl Slot {
    /// Grid coordinates covered by this slot, in cell order.
    pub fn cells(&self) -> impl Iterator<Item = GridCoord> {
        cell_run(self.start, self.direction, self.length)
    }

    /// How many other slots this one crosses.
    pub fn degree(&self) -> usize {
        self.crossings.iter().flatten().count()
    }
}

/// A slot in the input to [`Puzzle::new`]: where it starts, which way it
/// runs, and how many cells it spans.
#[derive(Debug, Clone, Copy)]
pub struct SlotSpec {
    pub start: GridCoord,
    pub direction: Direction,
    pub length: usize,
}

impl SlotSpec {
    fn cells(&self) -> impl Iterator<Item = GridCoord> {
        cell_run(self.start, self.direction, self.length)
    }
}

fn cell_run(
    start: GridCoord,
    direction: Direction,
    length: usize,
) -> impl Iterator<Item = GridCoord> {
    let (row, col) = start;
    (0..length).map(move |cell_idx| match direction {
        Direction::Across => (row, col + cell_idx),
        Direction::Down => (row + cell_idx, col),
    })
}

/// Ways a puzzle definition can be structurally invalid. Construction fails
/// fast with one of these instead of letting a bad grid corrupt the solve.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PuzzleError {
    #[error("the grid contains no slots")]
    NoSlots,
    #[error("slot at ({row}, {col}) spans {length} cell(s); slots must span at least two")]
    SlotTooShort { row: usize, col: usize, length: usize },
    #[error("more than two slots meet at cell ({row}, {col})")]
    CrowdedCell { row: usize, col: usize },
    #[error("slots {a} and {b} cross at more than one cell")]
    RepeatedCrossing { a: SlotId, b: SlotId },
    #[error("template cell {0:?} is neither '.' nor '#'")]
    BadTemplateCell(char),
    #[error("template rows do not all have the same width")]
    RaggedTemplate,
}

/// The immutable description of a fill problem: the slots, the crossings
/// between them, and the vocabulary of candidate words.
pub struct Puzzle {
    glyphs: Vec<char>,
    /// Vocabulary bucketed by word length, so that a slot's candidates are
    /// exactly the bucket matching its length.
    words: Vec<Vec<Word>>,
    slots: SmallVec<[Slot; MAX_SLOT_COUNT]>,
}

impl Debug for Puzzle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Puzzle")
            .field("glyphs", &self.glyphs)
            .field("slots", &self.slots)
            .field("words", &(["(", &self.word_count().to_string(), " entries)"].join("")))
            .finish()
    }
}

impl Puzzle {
    /// Build a puzzle from a word list and a set of slot specs, computing the
    /// crossings from the grid geometry.
    ///
    /// Words are lowercased and deduplicated; words whose length matches no
    /// slot are dropped up front since nothing could ever use them.
    pub fn new(word_list: &[&str], entries: &[SlotSpec]) -> Result<Puzzle, PuzzleError> {
        if entries.is_empty() {
            return Err(PuzzleError::NoSlots);
        }
        for entry in entries {
            if entry.length < 2 {
                return Err(PuzzleError::SlotTooShort {
                    row: entry.start.0,
                    col: entry.start.1,
                    length: entry.length,
                });
            }
        }

        // Record every distinct character the dictionary uses, in first-seen
        // order so that glyph ids are reproducible.
        let mut glyphs: Vec<char> = Vec::new();
        let mut glyph_ids_by_char: HashMap<char, GlyphId> = HashMap::new();
        for word in word_list {
            for ch in word.to_lowercase().chars() {
                glyph_ids_by_char.entry(ch).or_insert_with(|| {
                    glyphs.push(ch);
                    glyphs.len() - 1
                });
            }
        }

        // Keep a set of which slot lengths we actually need, to avoid
        // carrying irrelevant words.
        let word_lengths: HashSet<usize> = entries.iter().map(|entry| entry.length).collect();
        let max_length = word_lengths.iter().max().copied().unwrap_or(0);

        let mut words: Vec<Vec<Word>> = (0..max_length + 1).map(|_| vec![]).collect();
        let mut seen: HashSet<String> = HashSet::new();
        for raw in word_list {
            let word = raw.to_lowercase();
            let length = word.chars().count();
            if !word_lengths.contains(&length) || !seen.insert(word.clone()) {
                continue;
            }
            let glyph_seq = word.chars().map(|ch| glyph_ids_by_char[&ch]).collect();
            words[length].push(Word {
                string: word,
                glyphs: glyph_seq,
            });
        }

        // Build a map from cell location to the slots running through it,
        // which we can then use to calculate crossings. A cell shared by
        // more than two slots has no single crossing, so it is rejected
        // outright.
        let mut slots_by_cell: HashMap<GridCoord, Vec<(SlotId, usize)>> = HashMap::new();
        for (slot_id, entry) in entries.iter().enumerate() {
            for (cell_idx, coord) in entry.cells().enumerate() {
                let through = slots_by_cell.entry(coord).or_default();
                through.push((slot_id, cell_idx));
                if through.len() > 2 {
                    return Err(PuzzleError::CrowdedCell {
                        row: coord.0,
                        col: coord.1,
                    });
                }
            }
        }

        let mut slots: SmallVec<[Slot; MAX_SLOT_COUNT]> = SmallVec::with_capacity(entries.len());
        for (slot_id, entry) in entries.iter().enumerate() {
            let mut crossings: SmallVec<[Option<Crossing>; MAX_SLOT_LENGTH]> =
                SmallVec::with_capacity(entry.length);
            for coord in entry.cells() {
                let other = slots_by_cell[&coord]
                    .iter()
                    .find(|&&(other_id, _)| other_id != slot_id);
                crossings.push(other.map(|&(other_slot_id, other_slot_cell)| Crossing {
                    other_slot_id,
                    other_slot_cell,
                }));
            }

            // In a standard grid two slots cross at a single cell; a pair
            // sharing more than one cell would need to agree at each of
            // them, which the per-pair overlap model cannot express.
            let mut crossed = BitSet::with_capacity(entries.len());
            for crossing in crossings.iter().flatten() {
                if !crossed.insert(crossing.other_slot_id) {
                    return Err(PuzzleError::RepeatedCrossing {
                        a: slot_id,
                        b: crossing.other_slot_id,
                    });
                }
            }

            slots.push(Slot {
                id: slot_id,
                start: entry.start,
                direction: entry.direction,
                length: entry.length,
                crossings,
            });
        }

        Ok(Puzzle {
            glyphs,
            words,
            slots,
        })
    }

    /// Build a puzzle from a block template, with `.` representing an open
    /// cell and `#` representing a block. Maximal runs of at least two open
    /// cells become slots, across first and then down.
    pub fn from_template(word_list: &[&str], template: &str) -> Result<Puzzle, PuzzleError> {
        let rows: Vec<Vec<char>> = template
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(|line| line.chars().collect())
            .collect();

        for row in &rows {
            for &cell in row {
                if cell != '.' && cell != '#' {
                    return Err(PuzzleError::BadTemplateCell(cell));
                }
            }
            if row.len() != rows[0].len() {
                return Err(PuzzleError::RaggedTemplate);
            }
        }

        let height = rows.len();
        let width = rows.first().map(|row| row.len()).unwrap_or(0);
        let mut entries: Vec<SlotSpec> = Vec::new();

        for row in 0..height {
            let mut run = 0;
            for col in 0..=width {
                if col < width && rows[row][col] == '.' {
                    run += 1;
                } else {
                    if run >= 2 {
                        entries.push(SlotSpec {
                            start: (row, col - run),
                            direction: Direction::Across,
                            length: run,
                        });
                    }
                    run = 0;
                }
            }
        }
        for col in 0..width {
            let mut run = 0;
            for row in 0..=height {
                if row < height && rows[row][col] == '.' {
                    run += 1;
                } else {
                    if run >= 2 {
                        entries.push(SlotSpec {
                            start: (row - run, col),
                            direction: Direction::Down,
                            length: run,
                        });
                    }
                    run = 0;
                }
            }
        }

        Puzzle::new(word_list, &entries)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, slot_id: SlotId) -> &Slot {
        &self.slots[slot_id]
    }

    /// Ids of the slots crossing the given slot. Each appears exactly once.
    pub fn neighbors(&self, slot_id: SlotId) -> impl Iterator<Item = SlotId> + '_ {
        self.slots[slot_id]
            .crossings
            .iter()
            .flatten()
            .map(|crossing| crossing.other_slot_id)
    }

    /// The pair of cell indices (one per slot) at which two slots cross, or
    /// `None` if they never constrain each other directly.
    pub fn overlap(&self, a: SlotId, b: SlotId) -> Option<(usize, usize)> {
        self.slots[a]
            .crossings
            .iter()
            .enumerate()
            .find_map(|(cell_idx, crossing)| match crossing {
                Some(crossing) if crossing.other_slot_id == b => {
                    Some((cell_idx, crossing.other_slot_cell))
                }
                _ => None,
            })
    }

    /// Candidate words of the given length.
    pub fn words_of_length(&self, length: usize) -> &[Word] {
        self.words
            .get(length)
            .map(|bucket| bucket.as_slice())
            .unwrap_or(&[])
    }

    /// Every word usable somewhere in the grid.
    pub fn vocabulary(&self) -> impl Iterator<Item = &Word> {
        self.words.iter().flatten()
    }

    pub fn word_count(&self) -> usize {
        self.words.iter().map(|bucket| bucket.len()).sum()
    }

    /// Look up a candidate word for a slot by id.
    pub fn word(&self, slot_id: SlotId, word_id: WordId) -> &Word {
        &self.words[self.slots[slot_id].length][word_id]
    }

    pub fn glyph(&self, glyph_id: GlyphId) -> char {
        self.glyphs[glyph_id]
    }

    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }
}

/// The per-slot sets of words still available, the only state mutated while
/// solving. Initialized node-consistent: a slot's domain starts as exactly
/// the vocabulary bucket for its length, so no word of the wrong length can
/// ever appear in it.
pub struct DomainStore {
    domains: SmallVec<[BitSet; MAX_SLOT_COUNT]>,
}

/// A full copy of every slot's domain, taken before a search frame starts
/// committing candidates so that failure can rewind to the exact prior
/// state.
#[derive(Debug, Clone)]
pub struct DomainSnapshot {
    domains: SmallVec<[BitSet; MAX_SLOT_COUNT]>,
}

impl DomainStore {
    fn new(puzzle: &Puzzle) -> DomainStore {
        let domains = puzzle
            .slots()
            .iter()
            .map(|slot| (0..puzzle.words_of_length(slot.length).len()).collect())
            .collect();
        DomainStore { domains }
    }

    /// Ids of the words still available for a slot, in ascending order.
    pub fn candidates(&self, slot_id: SlotId) -> impl Iterator<Item = WordId> + '_ {
        self.domains[slot_id].iter()
    }

    pub fn candidate_count(&self, slot_id: SlotId) -> usize {
        self.domains[slot_id].len()
    }

    pub fn is_empty(&self, slot_id: SlotId) -> bool {
        self.domains[slot_id].is_empty()
    }

    pub fn contains(&self, slot_id: SlotId, word_id: WordId) -> bool {
        self.domains[slot_id].contains(word_id)
    }

    pub fn remove(&mut self, slot_id: SlotId, word_id: WordId) {
        self.domains[slot_id].remove(word_id);
    }

    /// Replace a slot's domain wholesale.
    pub fn set_domain(&mut self, slot_id: SlotId, word_ids: impl IntoIterator<Item = WordId>) {
        self.domains[slot_id] = word_ids.into_iter().collect();
    }

    pub fn snapshot(&self) -> DomainSnapshot {
        DomainSnapshot {
            domains: self.domains.clone(),
        }
    }

    /// Rewind every slot's domain to the snapshotted contents, including
    /// slots untouched since the snapshot was taken.
    pub fn restore(&mut self, snapshot: &DomainSnapshot) {
        self.domains.clone_from(&snapshot.domains);
    }
}

/// Work queue of directed arcs awaiting revision. Enqueueing an arc that is
/// already pending is a no-op; the pending revision will see the narrowed
/// domains either way.
struct ArcQueue {
    queue: VecDeque<(SlotId, SlotId)>,
}

impl ArcQueue {
    fn from_arcs(arcs: impl IntoIterator<Item = (SlotId, SlotId)>) -> ArcQueue {
        let mut queue = ArcQueue {
            queue: VecDeque::new(),
        };
        for arc in arcs {
            queue.push(arc);
        }
        queue
    }

    fn push(&mut self, arc: (SlotId, SlotId)) {
        if !self.queue.contains(&arc) {
            self.queue.push_back(arc);
        }
    }

    fn pop(&mut self) -> Option<(SlotId, SlotId)> {
        self.queue.pop_front()
    }
}

/// Every directed arc between a pair of crossing slots. Non-crossing pairs
/// are trivially consistent, so they never need to be enqueued.
fn all_arcs(puzzle: &Puzzle) -> Vec<(SlotId, SlotId)> {
    puzzle
        .slots()
        .iter()
        .flat_map(|slot| puzzle.neighbors(slot.id).map(move |other| (slot.id, other)))
        .collect()
}

/// The arcs directed into a slot from every slot crossing it, used to
/// propagate the effect of committing a single word.
fn arcs_into(puzzle: &Puzzle, slot_id: SlotId) -> Vec<(SlotId, SlotId)> {
    puzzle
        .neighbors(slot_id)
        .map(|other| (other, slot_id))
        .collect()
}

/// Make slot `x` arc-consistent with slot `y` by removing every word of
/// `x`'s domain whose letter at the shared cell appears in none of `y`'s
/// remaining words. Returns whether anything was removed. If the slots do
/// not cross there is nothing to do.
fn revise(puzzle: &Puzzle, domains: &mut DomainStore, x: SlotId, y: SlotId) -> bool {
    let Some((x_cell, y_cell)) = puzzle.overlap(x, y) else {
        return false;
    };

    // The set of glyphs y's remaining words place in the shared cell. A word
    // of x survives iff its own glyph there is in this set.
    let mut support = BitSet::with_capacity(puzzle.glyph_count());
    for word_id in domains.candidates(y) {
        support.insert(puzzle.word(y, word_id).glyphs[y_cell]);
    }

    let unsupported: Vec<WordId> = domains
        .candidates(x)
        .filter(|&word_id| !support.contains(puzzle.word(x, word_id).glyphs[x_cell]))
        .collect();
    for &word_id in &unsupported {
        domains.remove(x, word_id);
    }
    if !unsupported.is_empty() {
        trace!(
            "revise removed {} candidate(s) from slot {} against slot {}",
            unsupported.len(),
            x,
            y
        );
    }
    !unsupported.is_empty()
}

/// Run AC-3 over the given initial arcs until fixpoint or contradiction.
///
/// Each popped arc `(x, y)` is revised; if that empties `x`'s domain the
/// grid is unfillable as currently constrained and the call returns false
/// immediately. If it merely shrank `x`, every arc `(z, x)` for `z` a
/// crossing neighbor other than `y` is re-enqueued, since narrowing `x` may
/// have invalidated consistency that `z` previously established against it.
/// Domains only ever shrink, so the fixpoint is reached in finite time.
fn ac3(
    puzzle: &Puzzle,
    domains: &mut DomainStore,
    arcs: impl IntoIterator<Item = (SlotId, SlotId)>,
) -> bool {
    let mut queue = ArcQueue::from_arcs(arcs);
    while let Some((x, y)) = queue.pop() {
        if revise(puzzle, domains, x, y) {
            if domains.is_empty(x) {
                trace!("propagation emptied slot {}", x);
                return false;
            }
            for z in puzzle.neighbors(x) {
                if z != y {
                    queue.push((z, x));
                }
            }
        }
    }
    true
}

/// A slot assignment made during the filling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    pub slot_id: SlotId,
    pub word_id: WordId,
}

/// Counters describing how much work a solve took.
#[derive(Debug, Clone)]
pub struct Statistics {
    /// Search frames entered (slots selected for assignment).
    pub states: u64,
    /// Domain rollbacks performed after a candidate's subtree failed.
    pub backtracks: u64,
    pub duration: Duration,
}

/// The result of a successful fill: one choice per slot, in slot order.
#[derive(Debug)]
pub struct Solution {
    pub statistics: Statistics,
    pub choices: Vec<Choice>,
}

impl Solution {
    /// The word committed to the given slot.
    pub fn word<'p>(&self, puzzle: &'p Puzzle, slot_id: SlotId) -> Option<&'p str> {
        self.choices
            .iter()
            .find(|choice| choice.slot_id == slot_id)
            .map(|choice| puzzle.word(slot_id, choice.word_id).string.as_str())
    }
}

/// The partial mapping from slot to committed word, built up during search.
struct Assignment {
    words: SmallVec<[Option<WordId>; MAX_SLOT_COUNT]>,
}

impl Assignment {
    fn new(slot_count: usize) -> Assignment {
        Assignment {
            words: smallvec![None; slot_count],
        }
    }

    fn get(&self, slot_id: SlotId) -> Option<WordId> {
        self.words[slot_id]
    }

    fn is_assigned(&self, slot_id: SlotId) -> bool {
        self.words[slot_id].is_some()
    }

    fn set(&mut self, slot_id: SlotId, word_id: WordId) {
        debug_assert!(self.words[slot_id].is_none());
        self.words[slot_id] = Some(word_id);
    }

    fn unset(&mut self, slot_id: SlotId) {
        debug_assert!(self.words[slot_id].is_some());
        self.words[slot_id] = None;
    }
}

/// Depth-first backtracking fill over a puzzle's slots.
///
/// Construction initializes the node-consistent domain store; [`solve`]
/// establishes global arc consistency and then searches, propagating the
/// effect of each tentative commitment and rewinding the domains whenever a
/// candidate's subtree fails.
///
/// [`solve`]: Solver::solve
pub struct Solver<'p> {
    puzzle: &'p Puzzle,
    domains: DomainStore,
    assignment: Assignment,
    statistics: Statistics,
}

impl<'p> Solver<'p> {
    pub fn new(puzzle: &'p Puzzle) -> Solver<'p> {
        Solver {
            puzzle,
            domains: DomainStore::new(puzzle),
            assignment: Assignment::new(puzzle.slot_count()),
            statistics: Statistics {
                states: 0,
                backtracks: 0,
                duration: Duration::from_millis(0),
            },
        }
    }

    /// Search for a complete, consistent assignment. Returns `None` when the
    /// puzzle has no solution; that is a defined outcome, not a fault.
    pub fn solve(mut self) -> Option<Solution> {
        let start = Instant::now();
        debug!(
            "filling {} slots from {} candidate words",
            self.puzzle.slot_count(),
            self.puzzle.word_count()
        );

        // A slot with no words of its length can never be filled, and AC-3
        // only notices domains that *become* empty, so check up front.
        if let Some(slot) = self
            .puzzle
            .slots()
            .iter()
            .find(|slot| self.domains.is_empty(slot.id))
        {
            debug!(
                "no candidate words of length {} for the slot at {:?}",
                slot.length, slot.start
            );
            return None;
        }

        if !ac3(self.puzzle, &mut self.domains, all_arcs(self.puzzle)) {
            debug!("initial propagation proved the grid unfillable");
            return None;
        }

        let solved = self.backtrack();
        self.statistics.duration = start.elapsed();
        if !solved {
            debug!(
                "exhausted the search space after {} states without a fill",
                self.statistics.states
            );
            return None;
        }

        debug!(
            "filled in {:?} after {} states and {} backtracks",
            self.statistics.duration, self.statistics.states, self.statistics.backtracks
        );
        let choices = self
            .puzzle
            .slots()
            .iter()
            .map(|slot| Choice {
                slot_id: slot.id,
                word_id: self
                    .assignment
                    .get(slot.id)
                    .expect("search succeeded with an unassigned slot"),
            })
            .collect();
        Some(Solution {
            statistics: self.statistics,
            choices,
        })
    }

    /// One search frame: pick the most constrained unassigned slot and try
    /// its candidates in least-constraining order. Each candidate is
    /// committed tentatively, checked against the already-assigned slots it
    /// crosses, propagated through the arcs directed into it, and recursed
    /// on; failure rewinds the domains to this frame's snapshot and moves on
    /// to the next candidate. Returns whether a complete assignment was
    /// reached.
    fn backtrack(&mut self) -> bool {
        let Some(slot_id) = self.select_slot() else {
            // Every slot is assigned.
            return true;
        };
        self.statistics.states += 1;

        let snapshot = self.domains.snapshot();
        for word_id in self.order_candidates(slot_id) {
            if !self.crossings_agree(slot_id, word_id) {
                continue;
            }

            trace!(
                "slot {} <- {:?}",
                slot_id,
                self.puzzle.word(slot_id, word_id).string
            );
            self.assignment.set(slot_id, word_id);
            self.domains.set_domain(slot_id, [word_id]);

            // If propagating the commitment empties some domain, this
            // branch is dead and there is no point recursing into it.
            if ac3(self.puzzle, &mut self.domains, arcs_into(self.puzzle, slot_id))
                && self.backtrack()
            {
                return true;
            }

            self.assignment.unset(slot_id);
            self.domains.restore(&snapshot);
            self.statistics.backtracks += 1;
        }
        false
    }

    /// Choose the unassigned slot to fill next: fewest remaining candidates
    /// first (minimum remaining values), ties broken toward the slot
    /// crossing the most others (degree), then toward the lowest id so that
    /// repeated runs visit slots in the same order.
    fn select_slot(&self) -> Option<SlotId> {
        self.puzzle
            .slots()
            .iter()
            .filter(|slot| !self.assignment.is_assigned(slot.id))
            .min_by_key(|slot| {
                (
                    self.domains.candidate_count(slot.id),
                    Reverse(slot.degree()),
                )
            })
            .map(|slot| slot.id)
    }

    /// Order a slot's remaining candidates least-constraining first: by how
    /// many unassigned crossing slots also hold the same word, ascending,
    /// ties by word id. Only a same-length neighbor can hold the same word,
    /// so this is a coarse estimate of how much grief a choice will cause,
    /// computed without touching any domain.
    fn order_candidates(&self, slot_id: SlotId) -> Vec<WordId> {
        let length = self.puzzle.slot(slot_id).length;
        let mut scored: Vec<(usize, WordId)> = self
            .domains
            .candidates(slot_id)
            .map(|word_id| {
                let ruled_out = self
                    .puzzle
                    .neighbors(slot_id)
                    .filter(|&other| !self.assignment.is_assigned(other))
                    .filter(|&other| {
                        self.puzzle.slot(other).length == length
                            && self.domains.contains(other, word_id)
                    })
                    .count();
                (ruled_out, word_id)
            })
            .collect();
        scored.sort_unstable();
        scored.into_iter().map(|(_, word_id)| word_id).collect()
    }

    /// Whether committing this word agrees, letter for letter, with the
    /// words already committed to the slots it crosses. Constraints are
    /// local, so only crossing slots need checking.
    fn crossings_agree(&self, slot_id: SlotId, word_id: WordId) -> bool {
        let word = self.puzzle.word(slot_id, word_id);
        self.puzzle
            .slot(slot_id)
            .crossings
            .iter()
            .enumerate()
            .filter_map(|(cell_idx, crossing)| crossing.map(|crossing| (cell_idx, crossing)))
            .all(
                |(cell_idx, crossing)| match self.assignment.get(crossing.other_slot_id) {
                    Some(other_word_id) => {
                        let other = self.puzzle.word(crossing.other_slot_id, other_word_id);
                        other.glyphs[crossing.other_slot_cell] == word.glyphs[cell_idx]
                    }
                    None => true,
                },
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Direction::{Across, Down};

    /// Two slots sharing one cell, the across slot's last letter being the
    /// down slot's first:
    ///
    /// ```text
    /// aaa
    ///   b
    ///   b
    ///   b
    /// ```
    fn crossing_pair(word_list: &[&str]) -> Puzzle {
        Puzzle::new(
            word_list,
            &[
                SlotSpec { start: (1, 0), direction: Across, length: 3 },
                SlotSpec { start: (1, 2), direction: Down, length: 4 },
            ],
        )
        .expect("valid two-slot puzzle")
    }

    /// A full 3x3 word square: across slots 0..=2 (rows), down slots 3..=5
    /// (columns), every across crossing every down.
    fn square(word_list: &[&str]) -> Puzzle {
        Puzzle::from_template(
            word_list,
            "
            ...
            ...
            ...
            ",
        )
        .expect("valid word square")
    }

    fn word_id(puzzle: &Puzzle, slot_id: SlotId, word: &str) -> WordId {
        puzzle
            .words_of_length(puzzle.slot(slot_id).length)
            .iter()
            .position(|candidate| candidate.string == word)
            .expect("word present in the slot's bucket")
    }

    fn domain_contents(puzzle: &Puzzle, domains: &DomainStore) -> Vec<Vec<WordId>> {
        puzzle
            .slots()
            .iter()
            .map(|slot| domains.candidates(slot.id).collect())
            .collect()
    }

    /// Every complete consistent assignment, by exhaustive enumeration in
    /// slot order. Only usable on small fixtures.
    fn brute_force_solutions(puzzle: &Puzzle) -> Vec<Vec<WordId>> {
        fn extend(puzzle: &Puzzle, partial: &mut Vec<WordId>, found: &mut Vec<Vec<WordId>>) {
            let slot_id = partial.len();
            if slot_id == puzzle.slot_count() {
                found.push(partial.clone());
                return;
            }
            let length = puzzle.slot(slot_id).length;
            for word_id in 0..puzzle.words_of_length(length).len() {
                let consistent =
                    (0..slot_id).all(|earlier| match puzzle.overlap(slot_id, earlier) {
                        Some((i, j)) => {
                            puzzle.word(slot_id, word_id).glyphs[i]
                                == puzzle.word(earlier, partial[earlier]).glyphs[j]
                        }
                        None => true,
                    });
                if consistent {
                    partial.push(word_id);
                    extend(puzzle, partial, found);
                    partial.pop();
                }
            }
        }

        let mut found = Vec::new();
        extend(puzzle, &mut Vec::new(), &mut found);
        found
    }

    /// The solver and the brute-force enumerator must agree on whether the
    /// puzzle is satisfiable, and any fill the solver produces must be one
    /// the enumerator also found.
    fn assert_matches_brute_force(puzzle: &Puzzle) {
        let expected = brute_force_solutions(puzzle);
        match Solver::new(puzzle).solve() {
            Some(solution) => {
                let words: Vec<WordId> =
                    solution.choices.iter().map(|choice| choice.word_id).collect();
                assert!(
                    expected.contains(&words),
                    "solver produced an assignment brute force did not find: {:?}",
                    words
                );
            }
            None => {
                assert!(
                    expected.is_empty(),
                    "solver reported no solution but brute force found {}",
                    expected.len()
                );
            }
        }
    }

    fn assert_arc_consistent(puzzle: &Puzzle, domains: &DomainStore) {
        for slot in puzzle.slots() {
            for other in puzzle.neighbors(slot.id) {
                let (i, j) = puzzle
                    .overlap(slot.id, other)
                    .expect("neighbors must overlap");
                for word_id in domains.candidates(slot.id) {
                    let glyph = puzzle.word(slot.id, word_id).glyphs[i];
                    assert!(
                        domains
                            .candidates(other)
                            .any(|other_id| puzzle.word(other, other_id).glyphs[j] == glyph),
                        "{:?} in slot {} has no support in slot {}",
                        puzzle.word(slot.id, word_id).string,
                        slot.id,
                        other
                    );
                }
            }
        }
    }

    #[test]
    fn template_produces_expected_slots_and_crossings() {
        let puzzle = Puzzle::from_template(
            &["ab", "cozy", "den"],
            "
            #..#
            ....
            #..#
            ",
        )
        .expect("valid template");

        // Three across runs (rows), two down runs (columns 1 and 2).
        assert_eq!(puzzle.slot_count(), 5);
        assert_eq!(puzzle.slot(0).direction, Across);
        assert_eq!(puzzle.slot(0).start, (0, 1));
        assert_eq!(puzzle.slot(1).length, 4);
        assert_eq!(puzzle.slot(3).direction, Down);

        // The middle across slot crosses both downs, at its cells 1 and 2.
        let mut crossed: Vec<SlotId> = puzzle.neighbors(1).collect();
        crossed.sort_unstable();
        assert_eq!(crossed, vec![3, 4]);
        assert_eq!(puzzle.overlap(1, 3), Some((1, 1)));
        assert_eq!(puzzle.overlap(3, 1), Some((1, 1)));
        // Parallel slots never constrain each other directly.
        assert_eq!(puzzle.overlap(0, 1), None);
    }

    #[test]
    fn construction_rejects_short_slots() {
        let result = Puzzle::new(
            &["ab"],
            &[SlotSpec { start: (0, 0), direction: Across, length: 1 }],
        );
        assert_eq!(
            result.err(),
            Some(PuzzleError::SlotTooShort { row: 0, col: 0, length: 1 })
        );
    }

    #[test]
    fn construction_rejects_crowded_cells() {
        // Two across slots and a down slot all running through (0, 2).
        let result = Puzzle::new(
            &["abc", "de"],
            &[
                SlotSpec { start: (0, 0), direction: Across, length: 3 },
                SlotSpec { start: (0, 2), direction: Across, length: 2 },
                SlotSpec { start: (0, 2), direction: Down, length: 2 },
            ],
        );
        assert_eq!(
            result.err(),
            Some(PuzzleError::CrowdedCell { row: 0, col: 2 })
        );
    }

    #[test]
    fn construction_rejects_repeated_crossings() {
        // Two parallel overlapping runs share two cells.
        let result = Puzzle::new(
            &["abc"],
            &[
                SlotSpec { start: (0, 0), direction: Across, length: 3 },
                SlotSpec { start: (0, 1), direction: Across, length: 3 },
            ],
        );
        assert_eq!(
            result.err(),
            Some(PuzzleError::RepeatedCrossing { a: 0, b: 1 })
        );
    }

    #[test]
    fn construction_rejects_bad_templates() {
        assert_eq!(
            Puzzle::from_template(&["ab"], "..\nx.").err(),
            Some(PuzzleError::BadTemplateCell('x'))
        );
        assert_eq!(
            Puzzle::from_template(&["abc"], "...\n..").err(),
            Some(PuzzleError::RaggedTemplate)
        );
        assert_eq!(
            Puzzle::from_template(&["ab"], "##\n##").err(),
            Some(PuzzleError::NoSlots)
        );
    }

    #[test]
    fn domains_start_node_consistent() {
        let puzzle = crossing_pair(&["cat", "dog", "tree", "code", "hippo"]);
        let solver = Solver::new(&puzzle);

        for slot in puzzle.slots() {
            for word_id in solver.domains.candidates(slot.id) {
                assert_eq!(
                    puzzle.word(slot.id, word_id).string.chars().count(),
                    slot.length
                );
            }
        }
        // "hippo" matches no slot length and was dropped entirely.
        assert_eq!(solver.domains.candidate_count(0), 2);
        assert_eq!(solver.domains.candidate_count(1), 2);
        assert_eq!(puzzle.word_count(), 4);
    }

    #[test]
    fn vocabulary_is_lowercased_and_deduplicated() {
        let puzzle = crossing_pair(&["CAT", "cat", "Tree"]);
        assert_eq!(puzzle.word_count(), 2);
        assert!(puzzle
            .vocabulary()
            .all(|word| word.string.chars().all(char::is_lowercase)));
    }

    #[test]
    fn propagation_reaches_an_arc_consistent_fixpoint() {
        let puzzle = square(&["bat", "ago", "toe", "cat", "dog"]);
        let mut solver = Solver::new(&puzzle);

        assert!(ac3(&puzzle, &mut solver.domains, all_arcs(&puzzle)));
        assert_arc_consistent(&puzzle, &solver.domains);
    }

    #[test]
    fn propagation_reports_contradictions() {
        // No three-letter word ends with a letter any four-letter word
        // starts with, so the crossing cell has no consistent value.
        let puzzle = crossing_pair(&["cat", "dog", "echo", "idea"]);
        let mut solver = Solver::new(&puzzle);

        assert!(!ac3(&puzzle, &mut solver.domains, all_arcs(&puzzle)));
    }

    #[test]
    fn revise_is_a_no_op_for_non_crossing_slots() {
        let puzzle = square(&["bat", "ago", "toe"]);
        let mut solver = Solver::new(&puzzle);

        // Slots 0 and 1 are parallel across slots.
        assert!(!revise(&puzzle, &mut solver.domains, 0, 1));
        assert_eq!(solver.domains.candidate_count(0), 3);
    }

    #[test]
    fn snapshot_restore_is_exact_after_arbitrary_mutation() {
        let puzzle = square(&["bat", "ago", "toe", "cat"]);
        let mut solver = Solver::new(&puzzle);
        let before = domain_contents(&puzzle, &solver.domains);

        let snapshot = solver.domains.snapshot();
        solver.domains.remove(0, 0);
        solver.domains.set_domain(3, [1]);
        ac3(&puzzle, &mut solver.domains, all_arcs(&puzzle));
        solver.domains.restore(&snapshot);

        assert_eq!(domain_contents(&puzzle, &solver.domains), before);
    }

    #[test]
    fn solves_the_two_slot_example() {
        let puzzle = crossing_pair(&["cat", "dog", "tree", "code"]);
        let solution = Solver::new(&puzzle).solve().expect("unique fill exists");

        // Only "cat"/"tree" agree on the shared letter.
        assert_eq!(solution.word(&puzzle, 0), Some("cat"));
        assert_eq!(solution.word(&puzzle, 1), Some("tree"));
        assert!(solution.statistics.states >= puzzle.slot_count() as u64);
    }

    #[test]
    fn reports_no_solution_when_a_length_has_no_words() {
        let puzzle = crossing_pair(&["cat", "dog"]);
        assert!(Solver::new(&puzzle).solve().is_none());
    }

    #[test]
    fn fills_a_word_square() {
        // bat / ago / toe is a symmetric square, so rows may equal columns.
        let puzzle = square(&["bat", "ago", "toe"]);
        let solution = Solver::new(&puzzle).solve().expect("square is fillable");

        for slot in puzzle.slots() {
            for other in puzzle.neighbors(slot.id) {
                let (i, j) = puzzle.overlap(slot.id, other).unwrap();
                let word = solution.word(&puzzle, slot.id).unwrap();
                let other_word = solution.word(&puzzle, other).unwrap();
                assert_eq!(word.as_bytes()[i], other_word.as_bytes()[j]);
            }
        }
    }

    #[test]
    fn agrees_with_brute_force_on_small_fixtures() {
        assert_matches_brute_force(&square(&["bat", "ago", "toe"]));
        assert_matches_brute_force(&square(&["cat", "dog", "end"]));
        assert_matches_brute_force(&square(&["bat", "ago", "toe", "cat", "dog", "end"]));
        assert_matches_brute_force(&square(&["aab", "abb", "bba", "baa", "aba", "bab"]));
        assert_matches_brute_force(&crossing_pair(&["cat", "dog", "tree", "code"]));
        assert_matches_brute_force(&crossing_pair(&["cat", "dog", "echo", "idea"]));
    }

    #[test]
    fn repeated_solves_are_deterministic() {
        let puzzle = square(&["bat", "ago", "toe", "cat", "dog", "end"]);
        let first = Solver::new(&puzzle).solve().expect("fillable");
        let second = Solver::new(&puzzle).solve().expect("fillable");

        assert_eq!(first.choices, second.choices);
        assert_eq!(first.statistics.states, second.statistics.states);
        assert_eq!(first.statistics.backtracks, second.statistics.backtracks);
    }

    #[test]
    fn slot_selection_prefers_fewest_candidates_then_degree() {
        // The across slot crosses both downs; every domain starts at the
        // same size, so degree decides, despite the across having the
        // highest id.
        let puzzle = Puzzle::new(
            &["bat", "ago", "toe", "cat"],
            &[
                SlotSpec { start: (0, 0), direction: Down, length: 3 },
                SlotSpec { start: (0, 1), direction: Down, length: 3 },
                SlotSpec { start: (0, 0), direction: Across, length: 3 },
            ],
        )
        .expect("valid puzzle");
        let mut solver = Solver::new(&puzzle);
        assert_eq!(solver.select_slot(), Some(2));

        // Shrinking one down slot's domain makes it the most constrained.
        solver.domains.remove(0, 0);
        assert_eq!(solver.select_slot(), Some(0));
    }

    #[test]
    fn candidate_order_tries_least_constraining_first() {
        let puzzle = square(&["bat", "ago", "toe"]);
        let mut solver = Solver::new(&puzzle);

        // With "toe" gone from one crossing slot, choosing "toe" for the
        // first row can rule out one fewer neighbor value than the others.
        let toe = word_id(&puzzle, 0, "toe");
        solver.domains.remove(4, toe);
        let order = solver.order_candidates(0);
        assert_eq!(order[0], toe);
        assert_eq!(order.len(), 3);
    }
}
