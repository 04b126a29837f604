/*!
 * Translation core.
 *
 * Everything needed to turn a long subtitle stream into translated
 * entries, independent of task bookkeeping:
 *
 * - `segmentation`: splits the stream into bounded segments
 * - `continuity`: sentence and clause heuristics shared by the other stages
 * - `similarity`: normalised edit-distance ratio
 * - `prompts`: prompt templates and request building
 * - `response`: extraction and repair of model payloads
 * - `executor`: per-segment completion with validation and retry
 * - `merge`: joins segment results into one ordered track
 * - `cache`: fingerprinted result cache
 */

pub mod cache;
pub mod continuity;
pub mod executor;
pub mod merge;
pub mod prompts;
pub mod response;
pub mod segmentation;
pub mod similarity;

pub use self::cache::{CacheStats, ResultCache};
pub use self::continuity::{ContinuityClassifier, HeuristicClassifier};
pub use self::executor::{SegmentExecutor, SegmentOutput};
pub use self::merge::{MergeReport, ResultMerger};
pub use self::prompts::{PromptBuilder, PromptTemplate};
pub use self::segmentation::{Segment, Segmenter};
