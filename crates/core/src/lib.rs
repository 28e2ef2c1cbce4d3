pub mod config;
pub mod editor;
pub mod experiment;
mod invoke;
pub mod logging;
pub mod model;
pub mod prompts;
pub mod ranking;
pub mod report;
pub mod segment;
pub mod text;
pub mod voice;
pub mod writer;

pub use config::{
    Config, ConfigError, ConfigStore, LlmConfig, PathsConfig, PromptConfig, RecentUsage,
    WriterConfig,
};
pub use editor::{
    parse_change_list, ChangeList, ChapterRewrite, EditorError, EditorOutput, EditorPanel,
    EditorReport, EditorRequest, EditorStage, FeedbackError, SanityChecker, SanityOutcome,
    SanityRequest, Verdict,
};
pub use experiment::{
    Experiment, ExperimentError, ExperimentPlan, ExperimentResult, ExperimentRunner,
    ExperimentStatus, ModelProvider,
};
pub use logging::{
    LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, SinkLogger, StdoutLogSink,
    VecLogSink,
};
pub use model::{ChatMessage, ChatRequest, ChatRole, LanguageModel, LanguageModelError};
pub use prompts::{
    ChatPrompt, PromptArguments, PromptError, PromptRegistry, PromptSource, PromptTemplate,
};
pub use ranking::{
    DraftVersion, Elo, Ranker, RankingEntry, RankingError, RankingMethod, RankingResult, Scores,
    SmartOptions,
};
pub use report::{
    comparison_pairs, gather_final_versions, html_escape, load_rankings, render_editor_report,
    render_experiment_report, render_ranking_report, write_report, FinalVersion, ReportError,
};
pub use segment::{Segment, SegmentError, SegmentOptions, SegmentOutput, Segmenter, SplitMode};
pub use voice::{VoiceSpec, VoiceSpecError};
pub use writer::{
    clean_model_output, validate_revision, DraftError, DraftMode, DraftOutput, DraftRequest,
    DraftService, RevisionOutput, RevisionReport, RevisionRequest, RevisionService, SourceLoader,
    WriterStage,
};
