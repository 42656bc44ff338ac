//! Section skeleton: per-pair subtitles clustered into headings and renumbered
//! by first appearance.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context as _;

use crate::cli::TocCreateArgs;
use crate::config::{MergeStrategy, TocConfig};
use crate::embedding::{Embedder, create_embedder};
use crate::formats::{ProcessedQa, Toc, TocAssignment, TocSection};
use crate::kmeans::{Clustering, kmeans, squared_distance};
use crate::llm::{LanguageModel, create_model, truncate_chars};
use crate::workspace::{read_json, write_yaml};

pub async fn create(args: TocCreateArgs) -> anyhow::Result<()> {
    let processed_path = PathBuf::from(&args.processed);
    let out_path = PathBuf::from(&args.out);

    if out_path.exists() && !args.force {
        anyhow::bail!("toc output already exists: {}", out_path.display());
    }

    let config = args.toc.to_config();
    config.validate().context("validate toc config")?;

    let pairs: Vec<ProcessedQa> = read_json(&processed_path).context("read processed q&a")?;

    let toc = tokio::task::spawn_blocking(move || -> anyhow::Result<Toc> {
        let model = create_model(
            args.llm.engine,
            args.llm.command.as_deref(),
            &args.llm.command_args,
        )?;
        let embedder = create_embedder(args.embedding.embedding_engine)?;
        build_toc(&pairs, model.as_ref(), embedder.as_ref(), &config)
    })
    .await
    .context("join toc task")??;

    write_yaml(&out_path, &toc, args.force).context("write toc")?;
    tracing::info!(
        sections = toc.sections.len(),
        out = %out_path.display(),
        "toc created"
    );
    Ok(())
}

/// Runs subtitle generation, embedding, clustering, merging and renumbering.
pub fn build_toc(
    pairs: &[ProcessedQa],
    model: &dyn LanguageModel,
    embedder: &dyn Embedder,
    config: &TocConfig,
) -> anyhow::Result<Toc> {
    let strategy = config.merge_strategy()?;
    config.validate()?;
    if pairs.is_empty() {
        anyhow::bail!("no q&a pairs to build a table of contents from");
    }

    let subtitles = generate_subtitles(pairs, model, config)?;

    let mut owners = Vec::new();
    let mut lines = Vec::new();
    for (pos, pair_subtitles) in subtitles.iter().enumerate() {
        for line in pair_subtitles {
            owners.push(pos);
            lines.push(line.clone());
        }
    }
    tracing::info!(pairs = pairs.len(), subtitles = lines.len(), "embedding subtitles");

    let vectors = embedder.embed_batch(&lines).context("embed subtitles")?;
    if vectors.len() != lines.len() {
        anyhow::bail!(
            "embedding count mismatch: expected {}, got {}",
            lines.len(),
            vectors.len()
        );
    }

    let k = config.cluster_count.min(lines.len());
    let clustering = kmeans(&vectors, k, config.seed, config.max_kmeans_iterations)
        .context("cluster subtitles")?;

    let headings = merge_clusters(&clustering, &lines, &vectors, strategy, model, config);

    let mut clusters_by_pair = vec![BTreeSet::new(); pairs.len()];
    for (line_idx, &pos) in owners.iter().enumerate() {
        clusters_by_pair[pos].insert(clustering.assignments[line_idx]);
    }
    let assignments = pairs
        .iter()
        .zip(clusters_by_pair)
        .map(|(pair, clusters)| ClusterAssignment {
            pair_number: pair.pair_number,
            clusters: clusters.into_iter().collect(),
        })
        .collect::<Vec<_>>();

    reorder_by_first_appearance(&assignments, &headings)
}

/// Cluster ids one Q&A pair's subtitles landed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    pub pair_number: usize,
    pub clusters: Vec<usize>,
}

/// Renumbers clusters so the first one referenced (walking pairs in order,
/// each pair's clusters ascending) becomes section "0", the next new one "1",
/// and so on. Clusters no pair references are dropped.
pub fn reorder_by_first_appearance(
    assignments: &[ClusterAssignment],
    headings: &BTreeMap<usize, String>,
) -> anyhow::Result<Toc> {
    let mut renumbered = HashMap::<usize, usize>::new();
    let mut sections = Vec::new();

    for assignment in assignments {
        let mut clusters = assignment.clusters.clone();
        clusters.sort_unstable();
        for cluster in clusters {
            if renumbered.contains_key(&cluster) {
                continue;
            }
            let heading = headings.get(&cluster).with_context(|| {
                format!(
                    "pair {} references cluster {cluster} without a heading",
                    assignment.pair_number
                )
            })?;
            let index = renumbered.len();
            renumbered.insert(cluster, index);
            sections.push(TocSection {
                index: index.to_string(),
                heading: heading.clone(),
            });
        }
    }

    let assignments = assignments
        .iter()
        .map(|assignment| {
            let indices = assignment
                .clusters
                .iter()
                .map(|cluster| renumbered[cluster])
                .collect::<BTreeSet<_>>();
            TocAssignment {
                pair: assignment.pair_number.to_string(),
                sections: indices.into_iter().map(|i| i.to_string()).collect(),
            }
        })
        .collect();

    Ok(Toc {
        sections,
        assignments,
    })
}

/// Generates subtitles for every pair on up to `config.concurrency` worker
/// threads. Results come back in pair order.
fn generate_subtitles(
    pairs: &[ProcessedQa],
    model: &dyn LanguageModel,
    config: &TocConfig,
) -> anyhow::Result<Vec<Vec<String>>> {
    let workers = config.concurrency.clamp(1, pairs.len());
    let next = AtomicUsize::new(0);

    let mut results = std::thread::scope(|scope| {
        let handles = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let idx = next.fetch_add(1, Ordering::SeqCst);
                        let Some(pair) = pairs.get(idx) else {
                            break;
                        };
                        done.push((idx, subtitles_for_pair(pair, model, config)));
                    }
                    done
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("subtitle worker panicked"))
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })?
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

    results.sort_by_key(|(idx, _)| *idx);
    results
        .into_iter()
        .map(|(_, subtitles)| subtitles)
        .collect()
}

fn subtitles_for_pair(
    pair: &ProcessedQa,
    model: &dyn LanguageModel,
    config: &TocConfig,
) -> anyhow::Result<Vec<String>> {
    let prompt = build_subtitle_prompt(pair, config.length_limit);

    for attempt in 1..=config.max_subtitle_attempts {
        match model.generate(&prompt) {
            Ok(raw) => {
                let subtitles = parse_subtitles(&raw);
                if !subtitles.is_empty() {
                    tracing::debug!(pair = pair.pair_number, count = subtitles.len(), "subtitles");
                    return Ok(subtitles);
                }
                tracing::warn!(pair = pair.pair_number, attempt, "subtitle output is empty");
            }
            Err(err) => {
                tracing::warn!(
                    pair = pair.pair_number,
                    attempt,
                    error = %format!("{err:#}"),
                    "subtitle generation failed"
                );
            }
        }
    }

    anyhow::bail!(
        "no subtitles generated for pair {} after {} attempts",
        pair.pair_number,
        config.max_subtitle_attempts
    )
}

fn build_subtitle_prompt(pair: &ProcessedQa, length_limit: usize) -> String {
    let question = truncate_chars(&pair.question, length_limit);
    let answer = truncate_chars(&pair.answer, length_limit);
    format!(
        "You are planning the table of contents of a technical blog post.\n\
\n\
Task: Write 1 to 3 short section subtitles covering the Q&A pair below.\n\
\n\
Rules:\n\
- One subtitle per line, at most 10 words each.\n\
- Name the technical topic, not the conversation.\n\
\n\
BEGIN_QA_PAIR\n\
BEGIN_QUESTION\n\
{question}\n\
END_QUESTION\n\
BEGIN_ANSWER\n\
{answer}\n\
END_ANSWER\n\
END_QA_PAIR\n\
\n\
Output:\n\
- Output ONLY the subtitles, one per line. No numbering, no commentary.\n"
    )
}

/// One subtitle per non-empty line, with list markers, heading markers and
/// quotes stripped. Duplicates are dropped.
fn parse_subtitles(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in raw.lines() {
        let subtitle = clean_subtitle(line);
        if subtitle.is_empty() || out.contains(&subtitle) {
            continue;
        }
        out.push(subtitle);
    }
    out
}

fn clean_subtitle(line: &str) -> String {
    let mut s = line.trim();
    s = s.trim_start_matches('#').trim_start();
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = s.strip_prefix(marker) {
            s = rest.trim_start();
        }
    }
    let digits = s.chars().take_while(char::is_ascii_digit).count();
    if digits > 0
        && let Some(rest) = s[digits..]
            .strip_prefix(". ")
            .or_else(|| s[digits..].strip_prefix(") "))
    {
        s = rest.trim_start();
    }
    s.trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '*')
        .trim()
        .to_owned()
}

fn merge_clusters(
    clustering: &Clustering,
    lines: &[String],
    vectors: &[Vec<f32>],
    strategy: MergeStrategy,
    model: &dyn LanguageModel,
    config: &TocConfig,
) -> BTreeMap<usize, String> {
    let mut headings = BTreeMap::new();

    for cluster in 0..clustering.k() {
        let members = clustering.members(cluster);
        if members.is_empty() {
            tracing::debug!(cluster, "empty cluster; no section");
            continue;
        }

        let medoid = || {
            let centroid = &clustering.centroids[cluster];
            let mut best = members[0];
            for &idx in &members[1..] {
                if squared_distance(&vectors[idx], centroid)
                    < squared_distance(&vectors[best], centroid)
                {
                    best = idx;
                }
            }
            lines[best].clone()
        };

        let heading = match strategy {
            MergeStrategy::Medoid => medoid(),
            MergeStrategy::Llm => {
                let subtitles = members.iter().map(|&i| lines[i].as_str()).collect::<Vec<_>>();
                merge_with_model(cluster, &subtitles, model, config.max_subtitle_attempts)
                    .unwrap_or_else(|| {
                        tracing::warn!(cluster, "could not merge subtitles; using medoid");
                        medoid()
                    })
            }
        };
        tracing::debug!(cluster, members = members.len(), heading = %heading, "merged cluster");
        headings.insert(cluster, heading);
    }

    headings
}

fn merge_with_model(
    cluster: usize,
    subtitles: &[&str],
    model: &dyn LanguageModel,
    max_attempts: usize,
) -> Option<String> {
    let listing = subtitles
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "You are editing the table of contents of a technical blog post.\n\
\n\
Task: The subtitles below were grouped together. Write ONE section heading that covers all of them.\n\
\n\
BEGIN_SUBTITLE_CLUSTER\n\
{listing}\n\
END_SUBTITLE_CLUSTER\n\
\n\
Output:\n\
- Output ONLY the heading on a single line (at most 10 words).\n"
    );

    for attempt in 1..=max_attempts {
        match model.generate(&prompt) {
            Ok(raw) => {
                if let Some(heading) = parse_subtitles(&raw).into_iter().next() {
                    return Some(heading);
                }
                tracing::warn!(cluster, attempt, "merged heading is empty");
            }
            Err(err) => {
                tracing::warn!(cluster, attempt, error = %format!("{err:#}"), "merge subtitles failed");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::embedding::HashEmbedder;

    fn processed(pair_number: usize, question: &str) -> ProcessedQa {
        ProcessedQa {
            pair_number,
            question: question.to_owned(),
            answer: format!("answer to {question}"),
        }
    }

    fn headings(entries: &[(usize, &str)]) -> BTreeMap<usize, String> {
        entries
            .iter()
            .map(|(k, v)| (*k, (*v).to_owned()))
            .collect()
    }

    fn assignment(pair_number: usize, clusters: &[usize]) -> ClusterAssignment {
        ClusterAssignment {
            pair_number,
            clusters: clusters.to_vec(),
        }
    }

    #[test]
    fn first_referenced_cluster_becomes_section_zero() -> anyhow::Result<()> {
        // Cluster 0 ("A") is first referenced by pair 3, cluster 1 ("B") by pair 1.
        let assignments = vec![
            assignment(0, &[]),
            assignment(1, &[1]),
            assignment(2, &[1]),
            assignment(3, &[0]),
            assignment(4, &[0, 1]),
        ];
        let toc = reorder_by_first_appearance(&assignments, &headings(&[(0, "A"), (1, "B")]))?;

        assert_eq!(
            toc.sections,
            vec![
                TocSection {
                    index: "0".to_owned(),
                    heading: "B".to_owned()
                },
                TocSection {
                    index: "1".to_owned(),
                    heading: "A".to_owned()
                },
            ]
        );
        assert_eq!(toc.sections_for_pair(1), Some(&["0".to_owned()][..]));
        assert_eq!(toc.sections_for_pair(3), Some(&["1".to_owned()][..]));
        assert_eq!(
            toc.sections_for_pair(4),
            Some(&["0".to_owned(), "1".to_owned()][..])
        );
        assert_eq!(toc.sections_for_pair(0), Some(&[][..]));
        Ok(())
    }

    #[test]
    fn reorder_is_idempotent() -> anyhow::Result<()> {
        let assignments = vec![
            assignment(0, &[4, 2]),
            assignment(1, &[0]),
            assignment(2, &[2, 3]),
        ];
        let first = reorder_by_first_appearance(
            &assignments,
            &headings(&[(0, "zero"), (2, "two"), (3, "three"), (4, "four")]),
        )?;

        let again_assignments = first
            .assignments
            .iter()
            .map(|a| ClusterAssignment {
                pair_number: a.pair.parse().expect("pair number"),
                clusters: a
                    .sections
                    .iter()
                    .map(|s| s.parse().expect("section index"))
                    .collect(),
            })
            .collect::<Vec<_>>();
        let again_headings = first
            .sections
            .iter()
            .map(|s| (s.index.parse().expect("index"), s.heading.clone()))
            .collect::<BTreeMap<usize, String>>();
        let second = reorder_by_first_appearance(&again_assignments, &again_headings)?;

        assert_eq!(first, second);
        assert_eq!(first.sections[0].heading, "two");
        assert_eq!(first.sections[1].heading, "four");
        Ok(())
    }

    #[test]
    fn reorder_fails_on_cluster_without_heading() {
        let err = reorder_by_first_appearance(&[assignment(0, &[7])], &BTreeMap::new())
            .unwrap_err();
        assert!(format!("{err:#}").contains("cluster 7"));
    }

    #[test]
    fn parse_subtitles_strips_list_markers() {
        let raw = "1. Installing Rust\n- `Cargo basics`\n\n## Installing Rust\n* \"Toolchains\"";
        assert_eq!(
            parse_subtitles(raw),
            vec!["Installing Rust", "Cargo basics", "Toolchains"]
        );
    }

    #[test]
    fn build_toc_clusters_identical_subtitles_together() -> anyhow::Result<()> {
        let model = |prompt: &str| -> anyhow::Result<String> {
            if prompt.contains("BEGIN_SUBTITLE_CLUSTER") {
                let first = prompt
                    .lines()
                    .find_map(|l| l.strip_prefix("- "))
                    .unwrap_or("merged");
                return Ok(format!("{first} overview"));
            }
            if prompt.contains("borrow") {
                return Ok("Borrow checker errors".to_owned());
            }
            Ok("Async runtime setup".to_owned())
        };
        let pairs = vec![
            processed(0, "tokio runtime"),
            processed(1, "borrow error"),
            processed(2, "tokio again"),
        ];
        let config = TocConfig {
            cluster_count: 2,
            ..TocConfig::default()
        };

        let toc = build_toc(&pairs, &model, &HashEmbedder::default(), &config)?;

        assert_eq!(toc.sections.len(), 2);
        assert_eq!(toc.sections[0].heading, "Async runtime setup overview");
        assert_eq!(toc.sections[1].heading, "Borrow checker errors overview");
        assert_eq!(toc.sections_for_pair(0), Some(&["0".to_owned()][..]));
        assert_eq!(toc.sections_for_pair(1), Some(&["1".to_owned()][..]));
        assert_eq!(toc.sections_for_pair(2), Some(&["0".to_owned()][..]));
        Ok(())
    }

    #[test]
    fn fewer_subtitles_than_clusters_degrades_to_one_section() -> anyhow::Result<()> {
        let model = |_: &str| -> anyhow::Result<String> { Ok("Only topic".to_owned()) };
        let config = TocConfig {
            cluster_count: 5,
            merge_strategy: "medoid".to_owned(),
            ..TocConfig::default()
        };
        let toc = build_toc(&[processed(0, "q")], &model, &HashEmbedder::default(), &config)?;
        assert_eq!(toc.sections.len(), 1);
        assert_eq!(toc.sections[0].heading, "Only topic");
        Ok(())
    }

    #[test]
    fn unknown_merge_strategy_fails_before_model_calls() {
        let calls = Mutex::new(0usize);
        let model = |_: &str| -> anyhow::Result<String> {
            *calls.lock().expect("lock") += 1;
            Ok("x".to_owned())
        };
        let config = TocConfig {
            merge_strategy: "centroid-vote".to_owned(),
            ..TocConfig::default()
        };
        let err = build_toc(&[processed(0, "q")], &model, &HashEmbedder::default(), &config)
            .unwrap_err();
        assert!(format!("{err:#}").contains("unknown merge strategy"));
        assert_eq!(*calls.lock().expect("lock"), 0);
    }

    #[test]
    fn pair_without_subtitles_is_fatal() {
        let model = |_: &str| -> anyhow::Result<String> { Ok("\n  \n".to_owned()) };
        let err = build_toc(
            &[processed(0, "q")],
            &model,
            &HashEmbedder::default(),
            &TocConfig::default(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("no subtitles generated for pair 0"));
    }

    #[test]
    fn subtitle_prompt_truncates_each_side() {
        let pair = ProcessedQa {
            pair_number: 0,
            question: "q".repeat(50),
            answer: "a".repeat(50),
        };
        let prompt = build_subtitle_prompt(&pair, 10);
        assert!(prompt.contains(&format!("BEGIN_QUESTION\n{}\nEND_QUESTION", "q".repeat(10))));
        assert!(prompt.contains(&format!("BEGIN_ANSWER\n{}\nEND_ANSWER", "a".repeat(10))));
    }
}
