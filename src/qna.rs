//! Per-pair compression: question summarization, answer fence normalization
//! and code extraction.

use std::path::PathBuf;

use anyhow::Context as _;

use crate::cli::QnaProcessArgs;
use crate::code::{CodeRegistry, extract};
use crate::config::QnaConfig;
use crate::conversation::{ConversationStore as _, FsConversationStore, pair_messages};
use crate::formats::{ProcessedQa, QaPair};
use crate::llm::{LanguageModel, create_model};
use crate::pipeline::Stage;
use crate::quality::best_of;
use crate::score::{CoherenceScorer, LlmCoherenceScorer, lexical_recall};
use crate::workspace::{CODE_FILE, PROCESSED_FILE, write_json};

pub async fn process(args: QnaProcessArgs) -> anyhow::Result<()> {
    let out_dir = PathBuf::from(&args.out);
    let processed_path = out_dir.join(PROCESSED_FILE);
    let code_path = out_dir.join(CODE_FILE);

    for path in [&processed_path, &code_path] {
        if path.exists() && !args.force {
            anyhow::bail!("output already exists: {}", path.display());
        }
    }

    let config = args.qna.to_config();
    config.validate().context("validate qna config")?;

    let messages = FsConversationStore::new(&args.store)
        .fetch_messages(args.conversation_id)
        .await
        .context(Stage::Fetch)?;
    let pairs = pair_messages(&messages);
    if pairs.is_empty() {
        return Err(anyhow::anyhow!("conversation has no complete q&a pairs")).context(Stage::Pair);
    }

    let (processed, registry) = tokio::task::spawn_blocking(
        move || -> anyhow::Result<(Vec<ProcessedQa>, CodeRegistry)> {
            let model = create_model(
                args.llm.engine,
                args.llm.command.as_deref(),
                &args.llm.command_args,
            )?;
            let scorer = LlmCoherenceScorer::new(model.as_ref());
            let mut registry = CodeRegistry::new(config.code_prefix.clone());
            let processed = QnaProcessor::new(model.as_ref(), &scorer, &config)
                .process_all(&pairs, &mut registry);
            Ok((processed, registry))
        },
    )
    .await
    .context("join qna task")?
    .context(Stage::Process)?;

    write_json(&processed_path, &processed, args.force).context("write processed q&a")?;
    write_json(&code_path, &registry, args.force).context("write code registry")?;
    tracing::info!(
        pairs = processed.len(),
        snippets = registry.len(),
        out = %out_dir.display(),
        "q&a processed"
    );
    Ok(())
}

pub struct QnaProcessor<'a> {
    model: &'a dyn LanguageModel,
    scorer: &'a dyn CoherenceScorer,
    config: &'a QnaConfig,
}

impl<'a> QnaProcessor<'a> {
    pub fn new(
        model: &'a dyn LanguageModel,
        scorer: &'a dyn CoherenceScorer,
        config: &'a QnaConfig,
    ) -> Self {
        Self {
            model,
            scorer,
            config,
        }
    }

    /// Processes every pair in order, sharing one registry so code ids keep
    /// increasing across the whole conversation.
    pub fn process_all(&self, pairs: &[QaPair], registry: &mut CodeRegistry) -> Vec<ProcessedQa> {
        let total = pairs.len();
        pairs
            .iter()
            .map(|pair| {
                tracing::info!(pair = pair.pair_number, total, "processing q&a pair");
                self.process_pair(pair, registry)
            })
            .collect()
    }

    pub fn process_pair(&self, pair: &QaPair, registry: &mut CodeRegistry) -> ProcessedQa {
        let question = self.summarize_question(pair.pair_number, &pair.question.content);
        let answer = self.normalize_answer_fences(pair.pair_number, &pair.answer.content);

        let question = extract(
            &question,
            registry,
            self.model,
            self.config.max_description_attempts,
        );
        let answer = extract(
            &answer,
            registry,
            self.model,
            self.config.max_description_attempts,
        );

        ProcessedQa {
            pair_number: pair.pair_number,
            question,
            answer,
        }
    }

    fn summarize_question(&self, pair_number: usize, question: &str) -> String {
        let prompt = build_summarize_prompt(question);
        let outcome = best_of(
            self.config.max_iterations,
            self.config.coherence_threshold,
            |_| self.model.generate(&prompt).map(|s| s.trim().to_owned()),
            |candidate: &String| {
                let coherence = self.scorer.coherence(question, candidate)?;
                tracing::debug!(
                    pair = pair_number,
                    score = coherence.score,
                    reason = %coherence.reason,
                    "question coherence"
                );
                Ok(coherence.score)
            },
        );

        match outcome {
            Some(best) => {
                if !best.accepted {
                    tracing::warn!(
                        pair = pair_number,
                        score = best.score,
                        threshold = self.config.coherence_threshold,
                        "question summary below coherence threshold; keeping best candidate"
                    );
                }
                best.candidate
            }
            None => {
                tracing::warn!(
                    pair = pair_number,
                    "question summarization failed; keeping original question"
                );
                question.to_owned()
            }
        }
    }

    fn normalize_answer_fences(&self, pair_number: usize, answer: &str) -> String {
        let prompt = build_backtick_prompt(answer);
        let outcome = best_of(
            self.config.max_iterations,
            self.config.recall_threshold,
            |_| self.model.generate(&prompt).map(|s| s.trim().to_owned()),
            |candidate: &String| Ok(lexical_recall(answer, candidate)),
        );

        match outcome {
            Some(best) => {
                tracing::debug!(
                    pair = pair_number,
                    recall = best.score,
                    iterations = best.iterations,
                    "answer fence normalization"
                );
                if !best.accepted {
                    tracing::warn!(
                        pair = pair_number,
                        recall = best.score,
                        threshold = self.config.recall_threshold,
                        "answer recall below threshold; keeping best candidate"
                    );
                }
                best.candidate
            }
            None => {
                tracing::warn!(
                    pair = pair_number,
                    "answer normalization failed; keeping original answer"
                );
                answer.to_owned()
            }
        }
    }
}

fn build_summarize_prompt(question: &str) -> String {
    format!(
        "You are an editor preparing developer questions for a technical blog.\n\
\n\
Task: Summarize the question below so it states the problem and every requirement concisely.\n\
\n\
Hard rules:\n\
- Keep fenced code blocks (```) exactly as they are.\n\
- Do not answer the question.\n\
\n\
BEGIN_QUESTION\n\
{question}\n\
END_QUESTION\n\
\n\
Output:\n\
- Output ONLY the summarized question.\n"
    )
}

fn build_backtick_prompt(answer: &str) -> String {
    format!(
        "You are a technical editor.\n\
\n\
Task: Wrap every piece of source code, shell command or configuration in the answer below \
in fenced code blocks (```), adding a language tag when obvious.\n\
\n\
Hard rules:\n\
- Do not change, remove or reorder any other text.\n\
- Do not add explanations.\n\
\n\
BEGIN_ANSWER\n\
{answer}\n\
END_ANSWER\n\
\n\
Output:\n\
- Output ONLY the processed answer.\n"
    )
}
