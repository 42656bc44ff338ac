//! Section writing: incremental drafting per Q&A pair, single code ownership
//! across sections, and final rendering with code restored.

use std::borrow::Cow;
use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context as _;

use crate::cli::WriteArgs;
use crate::code::{
    CodeRegistry, contains_fence, contains_placeholder, find_placeholder, placeholders,
    resolve_placeholders, strip_placeholder,
};
use crate::config::WriterConfig;
use crate::formats::{ProcessedQa, Section, Toc};
use crate::llm::{LanguageModel, create_model};
use crate::pipeline::Stage;
use crate::workspace::{SECTIONS_FILE, read_json, read_yaml, write_artifact, write_json};

/// Marker a model leaves behind when it copies the Q&A framing into prose.
const QUESTION_MARKER: &str = "[Q]";
const HEADING_MARKER: &str = "## ";

pub async fn write(args: WriteArgs) -> anyhow::Result<()> {
    let out_path = PathBuf::from(&args.out);
    let sections_path = out_path.with_file_name(SECTIONS_FILE);

    for path in [&out_path, &sections_path] {
        if path.exists() && !args.force {
            anyhow::bail!("output already exists: {}", path.display());
        }
    }

    let config = args.writer.to_config();
    config.validate().context("validate writer config")?;

    let pairs: Vec<ProcessedQa> =
        read_json(&PathBuf::from(&args.processed)).context("read processed q&a")?;
    let registry: CodeRegistry = read_json(&PathBuf::from(&args.code)).context("read code")?;
    let toc: Toc = read_yaml(&PathBuf::from(&args.toc)).context("read toc")?;

    let post = tokio::task::spawn_blocking(move || -> anyhow::Result<RenderedPost> {
        let model = create_model(
            args.llm.engine,
            args.llm.command.as_deref(),
            &args.llm.command_args,
        )?;
        compose(&pairs, &registry, &toc, model.as_ref(), &config)
    })
    .await
    .context("join writer task")??;

    write_artifact(&out_path, post.content.as_bytes(), args.force).context("write post")?;
    write_json(&sections_path, &post.sections, args.force).context("write sections")?;
    tracing::info!(
        sections = post.sections.len(),
        out = %out_path.display(),
        "post written"
    );
    Ok(())
}

/// Sections keyed by index, kept in canonical (numeric) index order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    sections: Vec<Section>,
}

impl Document {
    /// One section per toc entry, each starting as its `## heading` line.
    pub fn from_toc(toc: &Toc) -> Self {
        let mut sections = toc
            .sections
            .iter()
            .map(|s| Section {
                section_index: s.index.clone(),
                heading: s.heading.clone(),
                document_text: format!("{HEADING_MARKER}{}", s.heading),
            })
            .collect::<Vec<_>>();
        sections.sort_by_key(|s| (s.section_index.parse::<usize>().ok(), s.section_index.clone()));
        Self { sections }
    }

    pub fn from_sections(mut sections: Vec<Section>) -> Self {
        sections.sort_by_key(|s| (s.section_index.parse::<usize>().ok(), s.section_index.clone()));
        Self { sections }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn get(&self, index: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.section_index == index)
    }

    fn get_mut(&mut self, index: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.section_index == index)
    }

    pub fn into_sections(self) -> Vec<Section> {
        self.sections
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPost {
    /// Rendered sections in index order.
    pub sections: Vec<Section>,
    pub content: String,
}

/// Runs the write, refine and render passes.
pub fn compose(
    pairs: &[ProcessedQa],
    registry: &CodeRegistry,
    toc: &Toc,
    model: &dyn LanguageModel,
    config: &WriterConfig,
) -> anyhow::Result<RenderedPost> {
    let mut document = Document::from_toc(toc);
    write_sections(&mut document, pairs, toc, model, config).context(Stage::Write)?;
    refine_code_ownership(&mut document, registry, model, config).context(Stage::Refine)?;
    Ok(render(&document, registry))
}

/// Folds every pair into each section it is assigned to, in pair order.
///
/// A missing assignment or an unknown section index is fatal. A section whose
/// every attempt breaks the acceptance rules keeps the last candidate.
pub fn write_sections(
    document: &mut Document,
    pairs: &[ProcessedQa],
    toc: &Toc,
    model: &dyn LanguageModel,
    config: &WriterConfig,
) -> anyhow::Result<()> {
    for pair in pairs {
        let indices = toc.sections_for_pair(pair.pair_number).with_context(|| {
            format!("missing section assignment for pair {}", pair.pair_number)
        })?;

        for index in indices {
            let section = document.get_mut(index).with_context(|| {
                format!(
                    "pair {} is assigned to unknown section {index}",
                    pair.pair_number
                )
            })?;
            tracing::info!(pair = pair.pair_number, section = %index, "writing section");
            let updated = write_section(&section.document_text, pair, index, model, config)?;
            section.document_text = updated;
        }
    }
    Ok(())
}

fn write_section(
    current: &str,
    pair: &ProcessedQa,
    index: &str,
    model: &dyn LanguageModel,
    config: &WriterConfig,
) -> anyhow::Result<String> {
    let prompt = build_write_prompt(current, pair);
    let mut last = None;

    for attempt in 1..=config.max_write_attempts {
        let raw = match model.generate(&prompt) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(
                    pair = pair.pair_number,
                    section = %index,
                    attempt,
                    error = %format!("{err:#}"),
                    "section write failed"
                );
                continue;
            }
        };

        let candidate = truncate_after_second_heading(raw.trim()).into_owned();
        if is_acceptable_draft(&candidate) {
            return Ok(candidate);
        }
        tracing::debug!(
            pair = pair.pair_number,
            section = %index,
            attempt,
            "draft contains a question marker or raw code fence"
        );
        last = Some(candidate);
    }

    match last {
        Some(candidate) => {
            tracing::warn!(
                pair = pair.pair_number,
                section = %index,
                attempts = config.max_write_attempts,
                "no draft passed the acceptance rules; keeping the last one"
            );
            Ok(candidate)
        }
        None => anyhow::bail!(
            "every attempt to write section {index} for pair {} failed",
            pair.pair_number
        ),
    }
}

fn is_acceptable_draft(text: &str) -> bool {
    !text.contains(QUESTION_MARKER) && !contains_fence(text)
}

fn build_write_prompt(document: &str, pair: &ProcessedQa) -> String {
    format!(
        "You are a technical writer turning a developer conversation into a blog post.\n\
\n\
Task: Update the blog section below so it also covers what the Q&A pair teaches.\n\
\n\
Hard rules:\n\
- Keep the section's `## ` heading line as the first line and do not add other `## ` headings.\n\
- Keep everything the section already says unless the Q&A pair corrects it.\n\
- Code appears as placeholders like `<-- Code_Snippet_1: description -->`. Copy placeholders verbatim \
on their own line where the code belongs. Never write fenced code blocks (```).\n\
- Write explanatory prose, not a transcript. Never write `[Q]` or `[A]`.\n\
\n\
BEGIN_SECTION_DOCUMENT\n\
{document}\n\
END_SECTION_DOCUMENT\n\
\n\
BEGIN_QUESTION\n\
{question}\n\
END_QUESTION\n\
\n\
BEGIN_ANSWER\n\
{answer}\n\
END_ANSWER\n\
\n\
Output:\n\
- Output ONLY the updated section in Markdown.\n",
        question = pair.question,
        answer = pair.answer,
    )
}

/// Drops everything from a second `## ` heading line onwards, keeping the
/// first heading and its body.
pub fn truncate_after_second_heading(text: &str) -> Cow<'_, str> {
    let mut heading_starts =
        line_starts(text).filter(|&start| text[start..].starts_with(HEADING_MARKER));
    let (Some(first), Some(second)) = (heading_starts.next(), heading_starts.next()) else {
        return Cow::Borrowed(text);
    };
    let body = text[first + HEADING_MARKER.len()..second].trim();
    Cow::Owned(format!("{HEADING_MARKER}{body}"))
}

fn line_starts(text: &str) -> impl Iterator<Item = usize> + '_ {
    std::iter::once(0).chain(text.match_indices('\n').map(|(idx, _)| idx + 1))
}

/// Text of the first Markdown heading line, without the `#` markers.
pub fn extract_heading(text: &str) -> &str {
    text.lines()
        .map(str::trim_start)
        .find(|line| line.starts_with('#'))
        .map_or("", |line| line.trim_start_matches('#').trim())
}

/// Ensures every code placeholder survives in at most one section.
///
/// For each shared snippet the model picks the section that keeps it and the
/// others are rewritten without it. A rewrite must drop exactly that
/// placeholder and keep every other one; otherwise the section is kept with
/// the placeholder removed.
pub fn refine_code_ownership(
    document: &mut Document,
    registry: &CodeRegistry,
    model: &dyn LanguageModel,
    config: &WriterConfig,
) -> anyhow::Result<()> {
    for snippet in registry.snippets() {
        let code_id = snippet.code_id.as_str();
        let owners = document
            .sections()
            .iter()
            .filter(|s| contains_placeholder(&s.document_text, code_id))
            .map(|s| (s.section_index.clone(), extract_heading(&s.document_text).to_owned()))
            .collect::<Vec<_>>();
        if owners.len() < 2 {
            continue;
        }

        let marker = document
            .sections()
            .iter()
            .find_map(|s| find_placeholder(&s.document_text, code_id).map(|p| p.text.to_owned()))
            .with_context(|| format!("placeholder for {code_id} disappeared"))?;

        let keep = select_owner(code_id, &marker, &owners, model, config);
        tracing::info!(
            code_id,
            keep = %keep,
            sections = owners.len(),
            "code placeholder shared by several sections"
        );

        for (index, _) in owners.iter().filter(|(index, _)| *index != keep) {
            let section = document
                .get_mut(index)
                .with_context(|| format!("section {index} disappeared"))?;
            section.document_text =
                rewrite_without(&section.document_text, code_id, &marker, index, model, config);
        }
    }
    Ok(())
}

fn select_owner(
    code_id: &str,
    marker: &str,
    owners: &[(String, String)],
    model: &dyn LanguageModel,
    config: &WriterConfig,
) -> String {
    let candidates = owners
        .iter()
        .map(|(index, heading)| format!("{index}: {heading}"))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "You are editing a technical blog post.\n\
\n\
Task: The code placeholder below appears in several sections. Pick the ONE section where the code fits best.\n\
\n\
BEGIN_PLACEHOLDER\n\
{marker}\n\
END_PLACEHOLDER\n\
\n\
BEGIN_CANDIDATE_SECTIONS\n\
{candidates}\n\
END_CANDIDATE_SECTIONS\n\
\n\
Output:\n\
- Output ONLY the index of the chosen section (the value before `:`).\n"
    );

    for attempt in 1..=config.max_select_attempts {
        match model.generate(&prompt) {
            Ok(raw) => {
                if let Some(index) = parse_selection(&raw, owners) {
                    return index;
                }
                tracing::debug!(code_id, attempt, answer = %raw.trim(), "invalid section selection");
            }
            Err(err) => {
                tracing::warn!(code_id, attempt, error = %format!("{err:#}"), "section selection failed");
            }
        }
    }

    tracing::warn!(code_id, "no valid section selection; keeping the first candidate");
    owners[0].0.clone()
}

fn parse_selection(raw: &str, owners: &[(String, String)]) -> Option<String> {
    let answer = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim();
    let head = answer.split(':').next().unwrap_or(answer).trim();

    owners
        .iter()
        .find(|(index, heading)| index == answer || index == head || heading == answer)
        .map(|(index, _)| index.clone())
}

fn rewrite_without(
    text: &str,
    code_id: &str,
    marker: &str,
    index: &str,
    model: &dyn LanguageModel,
    config: &WriterConfig,
) -> String {
    let prompt = format!(
        "You are editing a technical blog post.\n\
\n\
Task: Rewrite the section below so it no longer contains the code placeholder. \
Remove the placeholder and describe the idea in prose only where the text needs it.\n\
\n\
Hard rules:\n\
- Keep the `## ` heading line and every other placeholder unchanged.\n\
- Never write fenced code blocks (```).\n\
\n\
BEGIN_PLACEHOLDER\n\
{marker}\n\
END_PLACEHOLDER\n\
\n\
BEGIN_SECTION_TO_EDIT\n\
{text}\n\
END_SECTION_TO_EDIT\n\
\n\
Output:\n\
- Output ONLY the rewritten section in Markdown.\n"
    );

    let mut expected = placeholder_ids(text);
    expected.remove(code_id);

    for attempt in 1..=config.max_rewrite_attempts {
        match model.generate(&prompt) {
            Ok(raw) => {
                let candidate = truncate_after_second_heading(raw.trim()).into_owned();
                if !candidate.is_empty()
                    && !contains_fence(&candidate)
                    && placeholder_ids(&candidate) == expected
                {
                    return candidate;
                }
                tracing::debug!(
                    code_id,
                    section = %index,
                    attempt,
                    "rewrite changed the wrong placeholders"
                );
            }
            Err(err) => {
                tracing::warn!(
                    code_id,
                    section = %index,
                    attempt,
                    error = %format!("{err:#}"),
                    "section rewrite failed"
                );
            }
        }
    }

    tracing::warn!(code_id, section = %index, "removing placeholder without a rewrite");
    strip_placeholder(text, code_id)
}

/// Distinct code ids referenced by placeholders in `text`.
fn placeholder_ids(text: &str) -> HashSet<&str> {
    placeholders(text).into_iter().map(|p| p.code_id).collect()
}

/// Restores code for every placeholder and strips the leading heading
/// markers from each section.
pub fn render(document: &Document, registry: &CodeRegistry) -> RenderedPost {
    let sections = document
        .sections()
        .iter()
        .map(|section| {
            let resolved = resolve_placeholders(&section.document_text, registry);
            Section {
                section_index: section.section_index.clone(),
                heading: section.heading.clone(),
                document_text: resolved
                    .trim_start_matches('#')
                    .trim_start_matches(' ')
                    .to_owned(),
            }
        })
        .collect::<Vec<_>>();

    let content = sections
        .iter()
        .map(|s| s.document_text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    RenderedPost { sections, content }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionRecall {
    pub precision: f64,
    pub recall: f64,
}

/// Compares which placeholders each section of `generated` carries against
/// the same section of `reference`. Sections missing from `reference` count
/// as empty.
pub fn placeholder_precision_recall(generated: &Document, reference: &Document) -> PrecisionRecall {
    let mut true_positive = 0usize;
    let mut generated_total = 0usize;
    let mut reference_total = 0usize;

    for section in generated.sections() {
        let generated_set = placeholders(&section.document_text)
            .into_iter()
            .map(|p| p.text)
            .collect::<HashSet<_>>();
        let reference_text = reference
            .get(&section.section_index)
            .map_or("", |s| s.document_text.as_str());
        let reference_set = placeholders(reference_text)
            .into_iter()
            .map(|p| p.text)
            .collect::<HashSet<_>>();

        true_positive += generated_set.intersection(&reference_set).count();
        generated_total += generated_set.len();
        reference_total += reference_set.len();
    }

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    PrecisionRecall {
        precision: ratio(true_positive, generated_total),
        recall: ratio(true_positive, reference_total),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::code::placeholder;
    use crate::formats::{CodeSnippet, TocAssignment, TocSection};

    fn toc(sections: &[(&str, &str)], assignments: &[(&str, &[&str])]) -> Toc {
        Toc {
            sections: sections
                .iter()
                .map(|(index, heading)| TocSection {
                    index: (*index).to_owned(),
                    heading: (*heading).to_owned(),
                })
                .collect(),
            assignments: assignments
                .iter()
                .map(|(pair, sections)| TocAssignment {
                    pair: (*pair).to_owned(),
                    sections: sections.iter().map(|s| (*s).to_owned()).collect(),
                })
                .collect(),
        }
    }

    fn pair(pair_number: usize, question: &str, answer: &str) -> ProcessedQa {
        ProcessedQa {
            pair_number,
            question: question.to_owned(),
            answer: answer.to_owned(),
        }
    }

    fn section(index: &str, text: &str) -> Section {
        Section {
            section_index: index.to_owned(),
            heading: extract_heading(text).to_owned(),
            document_text: text.to_owned(),
        }
    }

    fn registry_with(ids: &[&str]) -> CodeRegistry {
        CodeRegistry::from_snippets(
            "Code_Snippet",
            ids.iter()
                .map(|id| CodeSnippet {
                    code_id: (*id).to_owned(),
                    snippet_text: format!("echo {id}"),
                    description: "demo".to_owned(),
                    language: None,
                })
                .collect(),
        )
    }

    fn between<'a>(text: &'a str, begin: &str, end: &str) -> &'a str {
        let start = text.find(begin).expect("begin marker") + begin.len();
        let rest = &text[start..];
        &rest[..rest.find(end).expect("end marker")]
    }

    #[test]
    fn truncates_at_second_level_two_heading() {
        let text = "## Setup\nInstall it.\n### Details\nMore.\n## Extra\nNot wanted.";
        assert_eq!(
            truncate_after_second_heading(text),
            "## Setup\nInstall it.\n### Details\nMore."
        );
        assert_eq!(truncate_after_second_heading("## Only\nbody"), "## Only\nbody");
        assert_eq!(
            truncate_after_second_heading("no heading\n## First\nbody\n## Second"),
            "## First\nbody"
        );
    }

    #[test]
    fn extract_heading_reads_first_heading_line() {
        assert_eq!(extract_heading("## Async basics\nbody"), "Async basics");
        assert_eq!(extract_heading("intro\n### Deep dive"), "Deep dive");
        assert_eq!(extract_heading("no heading"), "");
    }

    #[test]
    fn pass_a_appends_each_pair_to_its_sections() -> anyhow::Result<()> {
        let model = |prompt: &str| -> anyhow::Result<String> {
            let current = between(prompt, "BEGIN_SECTION_DOCUMENT\n", "\nEND_SECTION_DOCUMENT");
            let question = between(prompt, "BEGIN_QUESTION\n", "\nEND_QUESTION");
            Ok(format!("{current}\nCovers {question}."))
        };
        let toc = toc(
            &[("0", "Setup"), ("1", "Usage")],
            &[("0", &["0"]), ("1", &["0", "1"])],
        );
        let mut document = Document::from_toc(&toc);
        let pairs = vec![pair(0, "install", "a"), pair(1, "run", "b")];

        write_sections(&mut document, &pairs, &toc, &model, &WriterConfig::default())?;

        assert_eq!(
            document.get("0").map(|s| s.document_text.as_str()),
            Some("## Setup\nCovers install.\nCovers run.")
        );
        assert_eq!(
            document.get("1").map(|s| s.document_text.as_str()),
            Some("## Usage\nCovers run.")
        );
        Ok(())
    }

    #[test]
    fn pass_a_retries_drafts_with_raw_code_or_question_marker() -> anyhow::Result<()> {
        let replies = Mutex::new(vec![
            "## Setup\n```\nls\n```".to_owned(),
            "## Setup\n[Q] how?".to_owned(),
            "## Setup\nClean prose.\n## Bonus\nextra".to_owned(),
        ]);
        let model = |_: &str| -> anyhow::Result<String> {
            Ok(replies.lock().expect("lock").remove(0))
        };
        let toc = toc(&[("0", "Setup")], &[("0", &["0"])]);
        let mut document = Document::from_toc(&toc);

        write_sections(&mut document, &[pair(0, "q", "a")], &toc, &model, &WriterConfig::default())?;

        assert_eq!(
            document.get("0").map(|s| s.document_text.as_str()),
            Some("## Setup\nClean prose.")
        );
        assert!(replies.lock().expect("lock").is_empty());
        Ok(())
    }

    #[test]
    fn pass_a_keeps_last_draft_when_every_attempt_is_rejected() -> anyhow::Result<()> {
        let model = |_: &str| -> anyhow::Result<String> { Ok("## Setup\n[Q] still".to_owned()) };
        let toc = toc(&[("0", "Setup")], &[("0", &["0"])]);
        let mut document = Document::from_toc(&toc);
        let config = WriterConfig {
            max_write_attempts: 2,
            ..WriterConfig::default()
        };

        write_sections(&mut document, &[pair(0, "q", "a")], &toc, &model, &config)?;
        assert_eq!(
            document.get("0").map(|s| s.document_text.as_str()),
            Some("## Setup\n[Q] still")
        );
        Ok(())
    }

    #[test]
    fn pass_a_fails_on_missing_assignment() {
        let model = |_: &str| -> anyhow::Result<String> { Ok("## x".to_owned()) };
        let toc = toc(&[("0", "Setup")], &[]);
        let mut document = Document::from_toc(&toc);
        let err = write_sections(
            &mut document,
            &[pair(0, "q", "a")],
            &toc,
            &model,
            &WriterConfig::default(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("missing section assignment for pair 0"));
    }

    #[test]
    fn pass_b_leaves_placeholder_in_exactly_one_section() -> anyhow::Result<()> {
        let shared = placeholder("Code_Snippet_1", "demo");
        let solo = placeholder("Code_Snippet_2", "demo");
        let mut document = Document::from_sections(vec![
            section("0", &format!("## Setup\nInstall first.\n{shared}")),
            section("1", &format!("## Usage\nRun it.\n{shared}\n{solo}")),
            section("2", &format!("## Wrap up\n{shared}")),
        ]);

        let model = |prompt: &str| -> anyhow::Result<String> {
            if prompt.contains("BEGIN_CANDIDATE_SECTIONS") {
                return Ok("Usage".to_owned());
            }
            let text = between(prompt, "BEGIN_SECTION_TO_EDIT\n", "\nEND_SECTION_TO_EDIT");
            Ok(strip_placeholder(text, "Code_Snippet_1"))
        };

        refine_code_ownership(
            &mut document,
            &registry_with(&["Code_Snippet_1", "Code_Snippet_2"]),
            &model,
            &WriterConfig::default(),
        )?;

        let owners = document
            .sections()
            .iter()
            .filter(|s| contains_placeholder(&s.document_text, "Code_Snippet_1"))
            .map(|s| s.section_index.as_str())
            .collect::<Vec<_>>();
        assert_eq!(owners, vec!["1"]);
        assert!(contains_placeholder(
            &document.get("1").expect("section").document_text,
            "Code_Snippet_2"
        ));
        Ok(())
    }

    fn sections_holding<'a>(document: &'a Document, code_id: &str) -> Vec<&'a str> {
        document
            .sections()
            .iter()
            .filter(|s| contains_placeholder(&s.document_text, code_id))
            .map(|s| s.section_index.as_str())
            .collect()
    }

    #[test]
    fn pass_b_rejects_rewrite_that_brings_back_another_snippet() -> anyhow::Result<()> {
        let first = placeholder("Code_Snippet_1", "d");
        let second = placeholder("Code_Snippet_2", "d");
        let mut document = Document::from_sections(vec![
            section("0", &format!("## A\n{first}")),
            section("1", &format!("## B\n{second}")),
            section("2", &format!("## C\n{second}")),
        ]);

        let rewrites = Mutex::new(0usize);
        let model = |prompt: &str| -> anyhow::Result<String> {
            if prompt.contains("BEGIN_CANDIDATE_SECTIONS") {
                return Ok("1".to_owned());
            }
            let mut calls = rewrites.lock().expect("lock");
            *calls += 1;
            if *calls == 1 {
                return Ok(format!("## C\nprose\n{first}"));
            }
            Ok("## C\nprose only".to_owned())
        };

        refine_code_ownership(
            &mut document,
            &registry_with(&["Code_Snippet_1", "Code_Snippet_2"]),
            &model,
            &WriterConfig::default(),
        )?;

        assert_eq!(*rewrites.lock().expect("lock"), 2);
        assert_eq!(sections_holding(&document, "Code_Snippet_1"), vec!["0"]);
        assert_eq!(sections_holding(&document, "Code_Snippet_2"), vec!["1"]);
        assert_eq!(
            document.get("2").expect("section").document_text,
            "## C\nprose only"
        );
        Ok(())
    }

    #[test]
    fn pass_b_keeps_snippets_owned_only_by_the_rewritten_section() -> anyhow::Result<()> {
        let shared = placeholder("Code_Snippet_2", "demo");
        let solo = placeholder("Code_Snippet_3", "demo");
        let mut document = Document::from_sections(vec![
            section("0", &format!("## A\n{shared}")),
            section("1", &format!("## B\n{shared}\n{solo}")),
        ]);

        let model = |prompt: &str| -> anyhow::Result<String> {
            if prompt.contains("BEGIN_CANDIDATE_SECTIONS") {
                return Ok("0".to_owned());
            }
            Ok("## B\nprose only".to_owned())
        };

        refine_code_ownership(
            &mut document,
            &registry_with(&["Code_Snippet_2", "Code_Snippet_3"]),
            &model,
            &WriterConfig::default(),
        )?;

        assert_eq!(sections_holding(&document, "Code_Snippet_2"), vec!["0"]);
        assert_eq!(sections_holding(&document, "Code_Snippet_3"), vec!["1"]);
        assert_eq!(
            document.get("1").expect("section").document_text,
            format!("## B\n\n{solo}")
        );
        Ok(())
    }

    #[test]
    fn pass_b_strips_placeholder_when_model_never_complies()-> anyhow::Result<()> {
        let shared = placeholder("Code_Snippet_1", "demo");
        let mut document = Document::from_sections(vec![
            section("0", &format!("## A\n{shared}")),
            section("1", &format!("## B\n{shared}")),
        ]);
        let model = |prompt: &str| -> anyhow::Result<String> {
            if prompt.contains("BEGIN_CANDIDATE_SECTIONS") {
                return Ok("section nine".to_owned());
            }
            Ok(between(prompt, "BEGIN_SECTION_TO_EDIT\n", "\nEND_SECTION_TO_EDIT").to_owned())
        };

        refine_code_ownership(
            &mut document,
            &registry_with(&["Code_Snippet_1"]),
            &model,
            &WriterConfig::default(),
        )?;

        assert!(contains_placeholder(
            &document.get("0").expect("section").document_text,
            "Code_Snippet_1"
        ));
        assert_eq!(document.get("1").expect("section").document_text, "## B\n");
        Ok(())
    }

    #[test]
    fn render_restores_code_and_strips_heading_markers() {
        let registry = registry_with(&["Code_Snippet_1"]);
        let document = Document::from_sections(vec![
            section("1", "## Usage\nPlain text."),
            section("0", &format!("## Setup\nRun:\n{}", placeholder("Code_Snippet_1", "demo"))),
        ]);

        let post = render(&document, &registry);

        assert_eq!(post.sections[0].document_text, "Setup\nRun:\n```\necho Code_Snippet_1\n```\n");
        assert_eq!(post.sections[1].document_text, "Usage\nPlain text.");
        assert_eq!(
            post.content,
            "Setup\nRun:\n```\necho Code_Snippet_1\n```\n\n\nUsage\nPlain text."
        );
    }

    #[test]
    fn precision_recall_compares_placeholders_per_section() {
        let p1 = placeholder("Code_Snippet_1", "one");
        let p2 = placeholder("Code_Snippet_2", "two");
        let generated = Document::from_sections(vec![
            section("0", &format!("## A\n{p1}\n{p2}")),
            section("1", "## B"),
        ]);
        let reference = Document::from_sections(vec![
            section("0", &format!("## A\n{p1}")),
            section("1", &format!("## B\n{p2}")),
        ]);

        let score = placeholder_precision_recall(&generated, &reference);
        assert_eq!(score.precision, 0.5);
        assert_eq!(score.recall, 0.5);
    }
}
