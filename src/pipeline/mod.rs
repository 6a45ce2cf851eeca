mod chapter;
mod config;
mod resolver;
mod trace;

pub use chapter::{reassemble_translation, ChapterPipeline, ChapterTranslation, RunStats};
pub use config::{
    default_output_for, init_default_config, CliOverrides, RunConfig, TranslatorBackend,
};
pub use resolver::{
    ResolveContext, ResolvedTranslation, ResolverSettings, SegmentResolver, TranslationSource,
};
pub use trace::TraceWriter;
