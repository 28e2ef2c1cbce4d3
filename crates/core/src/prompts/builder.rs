//! Assembles writer, segment and revision prompts from a voice spec,
//! source text and editor feedback.

use super::{ChatPrompt, PromptError, PromptRegistry};
use crate::editor::ChangeList;
use crate::text::{last_words, length_hint, word_count, DEFAULT_ENDING_WORDS};
use crate::voice::VoiceSpec;

pub const WRITER_FULL_PROMPT: &str = "writer_full";
pub const WRITER_SEGMENTED_PROMPT: &str = "writer_segmented";
pub const REVISER_PROMPT: &str = "reviser";

pub struct WriterPromptInput<'a> {
    pub voice: &'a VoiceSpec,
    pub source: &'a str,
    pub previous_final: Option<&'a str>,
    pub feedback: Option<&'a ChangeList>,
}

pub struct SegmentPromptInput<'a> {
    pub voice: &'a VoiceSpec,
    pub segments: &'a [String],
    pub source_words: usize,
    pub target_words: usize,
    pub raw_ending: &'a str,
    pub previous_final: Option<&'a str>,
    pub feedback: Option<&'a ChangeList>,
}

pub struct RevisionPromptInput<'a> {
    pub voice: &'a VoiceSpec,
    pub current_draft: &'a str,
    pub change_list: &'a ChangeList,
    pub raw_ending: Option<&'a str>,
}

pub struct PromptBuilder<'a> {
    prompts: &'a PromptRegistry,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(prompts: &'a PromptRegistry) -> Self {
        Self { prompts }
    }

    pub fn writer_full(&self, input: &WriterPromptInput<'_>) -> Result<ChatPrompt, PromptError> {
        let ending = last_words(input.source, DEFAULT_ENDING_WORDS);
        self.prompts.chat_with(
            WRITER_FULL_PROMPT,
            [
                ("persona_note", input.voice.persona_note()),
                ("length_hint", length_hint(word_count(input.source))),
                ("voice_spec", input.voice.text.clone()),
                ("raw_source_section", raw_source_section(input.source)),
                ("prev_final_section", previous_final_section(input.previous_final)),
                ("feedback_section", feedback_section(input.feedback)),
                ("raw_ending_section", raw_ending_section(Some(&ending))),
            ],
        )
    }

    pub fn writer_segmented(
        &self,
        input: &SegmentPromptInput<'_>,
    ) -> Result<ChatPrompt, PromptError> {
        self.prompts.chat_with(
            WRITER_SEGMENTED_PROMPT,
            [
                ("persona_note", input.voice.persona_note()),
                ("length_hint", length_hint(input.source_words)),
                ("voice_spec", input.voice.text.clone()),
                ("segment_count", input.segments.len().to_string()),
                ("segments", label_segments(input.segments)),
                ("target_words", input.target_words.to_string()),
                ("raw_ending", input.raw_ending.to_string()),
                ("prev_final_section", previous_final_section(input.previous_final)),
                ("feedback_section", feedback_section(input.feedback)),
            ],
        )
    }

    pub fn reviser(&self, input: &RevisionPromptInput<'_>) -> Result<ChatPrompt, PromptError> {
        self.prompts.chat_with(
            REVISER_PROMPT,
            [
                ("voice_spec", input.voice.text.clone()),
                ("current_draft", input.current_draft.to_string()),
                ("change_list", input.change_list.to_pretty_json()),
                ("raw_ending_section", raw_ending_section(input.raw_ending)),
            ],
        )
    }
}

/// `[S1]`, `[S2]`, … labels, one blank line between segments.
pub fn label_segments(segments: &[String]) -> String {
    segments
        .iter()
        .enumerate()
        .map(|(idx, segment)| format!("[S{}]\n{}", idx + 1, segment.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn raw_source_section(source: &str) -> String {
    format!("RAW SOURCE:\n{}\n\n", source.trim())
}

fn previous_final_section(previous: Option<&str>) -> String {
    match previous.map(str::trim).filter(|text| !text.is_empty()) {
        Some(text) => format!("PREVIOUS FINAL CHAPTER:\n{text}\n\n"),
        None => String::new(),
    }
}

fn feedback_section(feedback: Option<&ChangeList>) -> String {
    match feedback.filter(|list| !list.is_empty()) {
        Some(list) => format!(
            "EDITOR FEEDBACK (apply while rewriting):\n{}\n\n",
            list.to_pretty_json()
        ),
        None => String::new(),
    }
}

fn raw_ending_section(ending: Option<&str>) -> String {
    match ending.map(str::trim).filter(|text| !text.is_empty()) {
        Some(text) => format!(
            "RAW ENDING:\n{text}\n\nEnd on the same narrative beat as RAW ENDING. Do not add interpretation, foreshadowing or closure that it lacks.\n"
        ),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice() -> VoiceSpec {
        VoiceSpec::inline("Wry Narrator", "Dry humour. Short paragraphs.")
    }

    #[test]
    fn segments_are_labelled_in_order() {
        let labelled = label_segments(&["first ".to_string(), "second".to_string()]);
        assert_eq!(labelled, "[S1]\nfirst\n\n[S2]\nsecond");
    }

    #[test]
    fn writer_prompt_carries_voice_and_source() {
        let registry = PromptRegistry::new().unwrap();
        let builder = PromptBuilder::new(&registry);
        let voice = voice();
        let chat = builder
            .writer_full(&WriterPromptInput {
                voice: &voice,
                source: "The bell rang twice. Nobody answered.",
                previous_final: None,
                feedback: None,
            })
            .unwrap();

        assert!(chat.system.contains("as Wry Narrator"));
        assert!(chat.system.contains("Dry humour"));
        assert!(chat.system.contains("≈6 words"));
        assert!(chat.user.contains("RAW SOURCE:\nThe bell rang twice."));
        assert!(chat.user.contains("RAW ENDING:"));
        assert!(!chat.user.contains("PREVIOUS FINAL CHAPTER"));
        assert!(!chat.user.contains("EDITOR FEEDBACK"));
    }

    #[test]
    fn iterative_writer_prompt_includes_previous_round() {
        let registry = PromptRegistry::new().unwrap();
        let builder = PromptBuilder::new(&registry);
        let voice = voice();
        let feedback = ChangeList {
            must: vec!["Keep the bell.".into()],
            nice: vec![],
        };
        let segments = vec!["The bell rang.".to_string()];
        let chat = builder
            .writer_segmented(&SegmentPromptInput {
                voice: &voice,
                segments: &segments,
                source_words: 3,
                target_words: 3,
                raw_ending: "The bell rang.",
                previous_final: Some("Earlier draft."),
                feedback: Some(&feedback),
            })
            .unwrap();

        assert!(chat.user.contains("[S1]\nThe bell rang."));
        assert!(chat.user.contains("PREVIOUS FINAL CHAPTER:\nEarlier draft."));
        assert!(chat.user.contains("Keep the bell."));
        assert!(chat.user.contains("1 labelled segments"));
    }

    #[test]
    fn reviser_prompt_embeds_change_list_json() {
        let registry = PromptRegistry::new().unwrap();
        let builder = PromptBuilder::new(&registry);
        let voice = voice();
        let list = ChangeList {
            must: vec!["Fix the name".into()],
            nice: vec!["Tighten".into()],
        };
        let chat = builder
            .reviser(&RevisionPromptInput {
                voice: &voice,
                current_draft: "Draft body",
                change_list: &list,
                raw_ending: None,
            })
            .unwrap();
        assert!(chat.user.contains("\"must\""));
        assert!(chat.user.contains("Fix the name"));
        assert!(!chat.user.contains("RAW ENDING"));
    }
}
