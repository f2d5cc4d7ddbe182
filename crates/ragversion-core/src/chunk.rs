//! Text chunking strategies.
//!
//! A [`Chunker`] turns a version's text into an ordered list of segments.
//! Segment order is significant: the chunk diff compares positions to tell
//! unchanged chunks from reordered ones, so every strategy here is
//! deterministic for a given input and settings.
//!
//! Two strategies ship by default and are looked up by name through
//! [`ChunkerRegistry`]:
//!
//! | Name | Strategy |
//! |------|----------|
//! | `recursive` | [`RecursiveChunker`] (default) |
//! | `character` | [`CharacterChunker`] |
//!
//! Sizes are measured in characters, not bytes, and token counts use a
//! 4 chars/token estimate.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
pub const DEFAULT_STRATEGY: &str = "recursive";

/// Separators tried in order by [`RecursiveChunker`]. The empty separator
/// splits between characters and always succeeds.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits text into segments and estimates their token cost.
pub trait Chunker: Send + Sync {
    /// Registry name of the strategy.
    fn name(&self) -> &str;

    /// Split `text` into ordered, non-empty segments. Blank text yields none.
    fn split(&self, text: &str) -> Vec<String>;

    fn estimate_tokens(&self, text: &str) -> usize {
        text.chars().count() / CHARS_PER_TOKEN
    }
}

/// Size settings shared by the built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkerSettings {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Boundary-aware chunker.
///
/// Splits on paragraph breaks first, then line breaks, then whitespace, and
/// only cuts inside a word when a single word exceeds `chunk_size`. Adjacent
/// pieces are packed into segments of at most `chunk_size` characters, and
/// each new segment starts with trailing pieces of the previous one totalling
/// at most `chunk_overlap` characters.
///
/// ```rust
/// use ragversion_core::chunk::{Chunker, ChunkerSettings, RecursiveChunker};
///
/// let chunker = RecursiveChunker::new(ChunkerSettings::new(5, 0));
/// assert_eq!(chunker.split("AAAA BBBB CCCC"), vec!["AAAA", "BBBB", "CCCC"]);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    settings: ChunkerSettings,
}

impl RecursiveChunker {
    pub fn new(settings: ChunkerSettings) -> Self {
        Self {
            settings: ChunkerSettings::new(settings.chunk_size, settings.chunk_overlap),
        }
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (index, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
            .map(|(i, sep)| (i, *sep))
            .unwrap_or((separators.len().saturating_sub(1), ""));
        let finer = &separators[(index + 1).min(separators.len())..];

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|p| !p.trim().is_empty()).collect()
        };

        let mut out = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) <= self.settings.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                out.extend(self.merge(&fitting, separator));
                fitting.clear();
            }
            if finer.is_empty() {
                out.push(piece.trim().to_string());
            } else {
                out.extend(self.split_with(piece, finer));
            }
        }
        if !fitting.is_empty() {
            out.extend(self.merge(&fitting, separator));
        }
        out
    }

    /// Pack pieces into segments joined by `separator`.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let size = self.settings.chunk_size;
        let overlap = self.settings.chunk_overlap;
        let sep_len = char_len(separator);

        let joined_len = |window: &VecDeque<&str>| -> usize {
            let body: usize = window.iter().map(|p| char_len(p)).sum();
            body + sep_len * window.len().saturating_sub(1)
        };

        let mut out = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();

        for piece in pieces {
            let len = char_len(piece);
            let extra = if window.is_empty() { 0 } else { sep_len };
            if !window.is_empty() && joined_len(&window) + extra + len > size {
                push_segment(&mut out, &window, separator);
                // Keep a tail of the previous segment as overlap, as long as
                // the next piece still fits behind it.
                while !window.is_empty() {
                    let current = joined_len(&window);
                    if current <= overlap && current + sep_len + len <= size {
                        break;
                    }
                    window.pop_front();
                }
            }
            window.push_back(piece);
        }
        push_segment(&mut out, &window, separator);
        out
    }
}

fn push_segment(out: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

impl Chunker for RecursiveChunker {
    fn name(&self) -> &str {
        "recursive"
    }

    fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_with(text, &SEPARATORS)
    }
}

/// Fixed-width character windows with overlap. Ignores word boundaries.
#[derive(Debug, Clone)]
pub struct CharacterChunker {
    settings: ChunkerSettings,
}

impl CharacterChunker {
    pub fn new(settings: ChunkerSettings) -> Self {
        Self {
            settings: ChunkerSettings::new(settings.chunk_size, settings.chunk_overlap),
        }
    }
}

impl Chunker for CharacterChunker {
    fn name(&self) -> &str {
        "character"
    }

    fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = text.chars().collect();
        let step = self.settings.chunk_size - self.settings.chunk_overlap;

        let mut out = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.settings.chunk_size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }
}

type ChunkerFactory = Arc<dyn Fn(ChunkerSettings) -> Arc<dyn Chunker> + Send + Sync>;

/// Name-keyed constructors for chunking strategies.
///
/// Unknown names resolve to the default strategy with a warning rather than
/// failing, so a typo in configuration degrades chunk quality but never
/// blocks tracking.
#[derive(Clone)]
pub struct ChunkerRegistry {
    factories: HashMap<String, ChunkerFactory>,
    default_name: String,
}

impl ChunkerRegistry {
    /// Create an empty registry whose default is `recursive`.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: DEFAULT_STRATEGY.to_string(),
        }
    }

    /// Registry with the `recursive` and `character` strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("recursive", |s| Arc::new(RecursiveChunker::new(s)) as Arc<dyn Chunker>);
        registry.register("character", |s| Arc::new(CharacterChunker::new(s)) as Arc<dyn Chunker>);
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(ChunkerSettings) -> Arc<dyn Chunker> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
        tracing::debug!(chunker = name, "registered chunker");
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Sorted list of registered names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the chunker registered under `name`, falling back to the default.
    pub fn build(&self, name: &str, settings: ChunkerSettings) -> Arc<dyn Chunker> {
        if let Some(factory) = self.factories.get(name) {
            return factory(settings);
        }
        tracing::warn!(
            chunker = name,
            fallback = %self.default_name,
            available = ?self.names(),
            "unknown chunker, using default"
        );
        match self.factories.get(&self.default_name) {
            Some(factory) => factory(settings),
            None => Arc::new(RecursiveChunker::new(settings)),
        }
    }
}

impl Default for ChunkerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
