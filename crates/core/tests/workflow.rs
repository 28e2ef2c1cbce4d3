use std::collections::VecDeque;
use std::fs;
use std::io;
use std::sync::Mutex;

use prose_core::{
    load_rankings, render_editor_report, render_ranking_report, write_report, ChapterRewrite,
    ChatRequest, DraftMode, DraftRequest, DraftService, DraftVersion, EditorPanel, EditorRequest,
    LanguageModel, LanguageModelError, LogLevel, PromptRegistry, Ranker, RevisionRequest,
    RevisionService, Segmenter, SourceLoader, VecLogSink, VoiceSpec,
};
use tempfile::tempdir;

struct MockLanguageModel {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockLanguageModel {
    fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn request(&self, index: usize) -> ChatRequest {
        self.requests.lock().expect("mock mutex poisoned")[index].clone()
    }

    fn assert_empty(&self) {
        let guard = self.responses.lock().expect("mock mutex poisoned");
        assert!(
            guard.is_empty(),
            "expected all mock responses to be consumed"
        );
    }
}

impl LanguageModel for MockLanguageModel {
    fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError> {
        self.requests
            .lock()
            .expect("mock mutex poisoned")
            .push(request.clone());
        let mut guard = self.responses.lock().expect("mock mutex poisoned");
        guard.pop_front().ok_or_else(|| {
            LanguageModelError::new(io::Error::new(
                io::ErrorKind::Other,
                "mock language model has no remaining responses",
            ))
        })
    }
}

#[test]
fn segment_draft_review_revise_rank_and_report() -> Result<(), Box<dyn std::error::Error>> {
    const RANKING: &str = "Critic A: the noir revision is tighter.\nCritic B: agreed, gothic drifts.\n```json\n{\"table\": [{\"rank\": 1, \"id\": \"DRAFT_noir\", \"clarity\": 9, \"tone\": 8, \"plot_fidelity\": 9, \"tone_fidelity\": 8, \"overall\": 9}, {\"rank\": 2, \"id\": \"DRAFT_gothic\", \"clarity\": 6, \"tone\": 7, \"plot_fidelity\": 8, \"tone_fidelity\": 6, \"overall\": 6}], \"analysis\": \"noir keeps the ending beat\", \"feedback\": {\"DRAFT_gothic\": \"Cut the adverbs.\"}}\n```";

    let temp = tempdir()?;
    let root = temp.path();
    let raw_dir = root.join("raw");
    let segments_dir = root.join("segments");
    let drafts_dir = root.join("drafts");
    fs::create_dir_all(&raw_dir)?;
    fs::write(
        raw_dir.join("ch_0001.json"),
        r#"{"title": "Chapter 1", "content": "<p>The rain fell on the inn all evening.</p><p>Translator: Someone</p><p>He waited by the door for the courier.</p><p>Nobody came that night.</p>"}"#,
    )?;
    fs::write(root.join("noir.md"), "Short sentences. Wet streets. No adverbs.")?;
    fs::write(root.join("gothic.md"), "Long shadows and candlelight.")?;

    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let mock = MockLanguageModel::new([
        "Here is the draft:\nRain hammered the inn all evening. He waited by the door for the courier. Nobody came that night.",
        "The candles guttered as rain beat upon the inn. He lingered by the door. No one came.",
        "MUST:\n- Name the inn.\nNICE:\n- Vary sentence rhythm.",
        "MUST:\n- Keep the closing line flat.",
        "## MUST\n- Name the inn.\n- Keep the closing line flat.\n## NICE\n- Vary sentence rhythm.",
        "Rain hammered the Gray Gull all evening. He waited by the door for the courier. Nobody came that night.",
        RANKING,
    ]);

    let segmented = Segmenter::new(&sink).segment_file(&raw_dir.join("ch_0001.json"), &segments_dir)?;
    let ids: Vec<_> = segmented.segments.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["ch_0001_p001", "ch_0001_p002", "ch_0001_p003"]);
    assert!(segments_dir.join("ch_0001_p002.txt").is_file());

    // Only the segment manifest is visible to the loader here.
    let source = SourceLoader::new(root.join("no_raw"), &segments_dir).load("ch_0001")?;
    assert!(source.text.starts_with("The rain fell on the inn"));
    assert!(!source.text.contains("Translator"));

    let noir = VoiceSpec::load(root.join("noir.md"))?;
    let gothic = VoiceSpec::load(root.join("gothic.md"))?;
    let writer = DraftService::new(&prompts, &sink).with_prompt_log(root.join("logs/prompts"));
    let noir_draft = writer.generate(
        &mock,
        &DraftRequest {
            chapter_id: "ch_0001",
            source: &source.text,
            voice: &noir,
            output_dir: drafts_dir.join("noir"),
            mode: DraftMode::Segmented,
            previous_final: None,
            feedback: None,
        },
    )?;
    assert!(noir_draft.text.starts_with("Rain hammered the inn"));
    assert!(drafts_dir.join("noir/ch_0001.txt").is_file());
    assert!(mock.request(0).user.contains("[S1]"));

    let gothic_draft = writer.generate(
        &mock,
        &DraftRequest {
            chapter_id: "ch_0001",
            source: &source.text,
            voice: &gothic,
            output_dir: drafts_dir.join("gothic"),
            mode: DraftMode::Full,
            previous_final: None,
            feedback: None,
        },
    )?;
    assert_eq!(fs::read_dir(root.join("logs/prompts"))?.count(), 2);

    let rewrites = ChapterRewrite::collect(
        &drafts_dir.join("noir"),
        &SourceLoader::new(&raw_dir, &segments_dir),
    )?;
    assert_eq!(rewrites.len(), 1);
    let paired_raw = rewrites[0].raw_source.as_deref().unwrap_or_default();
    assert!(paired_raw.contains("He waited by the door for the courier."));
    assert!(!paired_raw.contains("Translator"));
    let editor = EditorPanel::new(&prompts, &sink).review(
        &mock,
        &EditorRequest {
            voice: &noir,
            chapters: &rewrites,
            round: 1,
            output_dir: drafts_dir.join("noir"),
        },
    )?;
    assert!(editor.report.accepted);
    assert_eq!(
        editor.report.change_list.must,
        vec!["Name the inn.", "Keep the closing line flat."]
    );
    assert!(drafts_dir.join("noir/editor_round1.json").is_file());
    assert!(!sink.contains(LogLevel::Warn, "raw source missing"));

    let revised = RevisionService::new(&prompts, &sink).revise(
        &mock,
        &RevisionRequest {
            chapter_id: "ch_0001",
            voice: &noir,
            current_draft: &noir_draft.text,
            change_list: &editor.report.change_list,
            raw_ending: Some("Nobody came that night."),
            output_path: drafts_dir.join("noir/ch_0001_rev1.txt"),
        },
    )?;
    assert!(revised.text.contains("Gray Gull"));
    assert_eq!(revised.report.must_changes_count, 2);
    assert!(revised.report.warnings.is_empty());
    assert!(!revised.report.endings_differ);
    assert_eq!(mock.request(5).temperature, Some(0.3));

    let ranking = Ranker::new(&prompts, &sink).rank(
        &mock,
        "ch_0001",
        &[
            DraftVersion::new("noir", revised.text.clone()),
            DraftVersion::new("gothic", gothic_draft.text.clone()),
        ],
        Some(&source.text),
    )?;
    let winner = ranking.winner().expect("winner");
    assert_eq!(winner.label(), "noir");
    let reports_dir = root.join("reports");
    ranking.save(&reports_dir)?;

    let loaded = load_rankings(&reports_dir)?;
    assert_eq!(loaded.len(), 1);
    let html = render_ranking_report(&loaded);
    assert!(html.contains("noir keeps the ending beat"));
    assert!(html.contains("Cut the adverbs."));
    write_report(&reports_dir.join("rankings.html"), &html)?;
    write_report(
        &reports_dir.join("editor_round1.html"),
        &render_editor_report(&editor.report),
    )?;
    assert!(reports_dir.join("rankings.html").is_file());
    assert!(reports_dir.join("editor_round1.html").is_file());

    mock.assert_empty();
    Ok(())
}
