//! Publishing collaborators: a local Markdown target and Notion pages.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use serde::Serialize;
use serde_json::{Value, json};

use crate::cli::{PublishArgs, PublishOptions, PublisherKind};
use crate::formats::{PostDraft, PostTags, PublishedPage, Toc};
use crate::workspace::read_yaml;

const NOTION_API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const NOTION_MAX_CHILDREN: usize = 100;
const NOTION_MAX_TEXT: usize = 2000;

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, post: &PostDraft) -> anyhow::Result<PublishedPage>;
}

pub async fn run(args: PublishArgs) -> anyhow::Result<()> {
    let post_path = PathBuf::from(&args.post);
    let content = tokio::fs::read_to_string(&post_path)
        .await
        .with_context(|| format!("read post: {}", post_path.display()))?;

    let toc: Option<Toc> = match &args.toc {
        Some(path) => Some(read_yaml(Path::new(path)).context("read toc")?),
        None => None,
    };
    let title = resolve_title(args.publish.title.as_deref(), toc.as_ref())?;

    let default_dir = post_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("published");
    let publisher = create_publisher(&args.publish, &default_dir)?;

    let draft = PostDraft {
        title,
        content,
        tags: args.publish.tags(),
    };
    let page = publisher.publish(&draft).await?;
    tracing::info!(page_id = %page.page_id, url = %page.url, "post published");
    Ok(())
}

/// `explicit` when non-empty, otherwise the heading of section "0".
pub fn resolve_title(explicit: Option<&str>, toc: Option<&Toc>) -> anyhow::Result<String> {
    if let Some(title) = explicit.map(str::trim)
        && !title.is_empty()
    {
        return Ok(title.to_owned());
    }

    toc.and_then(|toc| toc.sections.iter().find(|s| s.index == "0"))
        .map(|s| s.heading.trim().to_owned())
        .filter(|heading| !heading.is_empty())
        .context("missing --title and no section \"0\" heading to derive it from")
}

pub fn create_publisher(
    options: &PublishOptions,
    default_dir: &Path,
) -> anyhow::Result<Box<dyn Publisher>> {
    match options.publisher {
        PublisherKind::Fs => {
            let dir = options
                .publish_dir
                .as_deref()
                .map_or_else(|| default_dir.to_path_buf(), PathBuf::from);
            Ok(Box::new(FsPublisher::new(dir)))
        }
        PublisherKind::Notion => Ok(Box::new(
            NotionPublisher::from_env().context("load notion config")?,
        )),
    }
}

/// Writes `<dir>/<slug>.md` with a YAML front matter block.
#[derive(Debug, Clone)]
pub struct FsPublisher {
    dir: PathBuf,
}

impl FsPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[derive(Debug, Serialize)]
struct FrontMatter<'a> {
    page_id: &'a str,
    title: &'a str,
    tags: &'a PostTags,
    published_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
impl Publisher for FsPublisher {
    async fn publish(&self, post: &PostDraft) -> anyhow::Result<PublishedPage> {
        let page_id = uuid::Uuid::new_v4().to_string();
        let front_matter = FrontMatter {
            page_id: &page_id,
            title: &post.title,
            tags: &post.tags,
            published_at: chrono::Utc::now(),
        };
        let yaml = serde_yaml::to_string(&front_matter).context("serialize front matter")?;
        let document = format!("---\n{yaml}---\n\n{}\n", post.content.trim_end());

        let dir = self.dir.clone();
        let path = dir.join(format!("{}.md", slugify(&post.title)));
        let written = path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create publish dir: {}", dir.display()))?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)
                .with_context(|| format!("create temp file in: {}", dir.display()))?;
            tmp.write_all(document.as_bytes())
                .context("write published post")?;
            tmp.persist(&written)
                .with_context(|| format!("persist: {}", written.display()))?;
            Ok(())
        })
        .await
        .context("join publish task")??;

        tracing::debug!(path = %path.display(), "wrote published post");
        Ok(PublishedPage {
            page_id,
            url: format!("file://{}", path.display()),
            public_url: None,
        })
    }
}

fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "post".to_owned()
    } else {
        slug.to_owned()
    }
}

/// Creates a page in a Notion database, with the tag lists as multi-select
/// properties.
#[derive(Clone)]
pub struct NotionPublisher {
    client: reqwest::Client,
    token: String,
    database_id: String,
    base_url: String,
}

impl NotionPublisher {
    pub fn new(token: String, database_id: String, base_url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("build notion http client")?;
        Ok(Self {
            client,
            token,
            database_id,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("NOTION_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("NOTION_TOKEN is not set")?;
        let database_id = std::env::var("NOTION_DATABASE_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("NOTION_DATABASE_ID is not set")?;
        let base_url = std::env::var("TECHNOTE_NOTION_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| NOTION_API_BASE.to_owned());
        url::Url::parse(&base_url)
            .with_context(|| format!("invalid TECHNOTE_NOTION_BASE_URL: {base_url}"))?;
        Self::new(token, database_id, base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, body: &Value) -> anyhow::Result<Value> {
        let response = request
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(body)
            .send()
            .await
            .context("send notion request")?;
        let status = response.status();
        let payload: Value = response.json().await.context("parse notion response json")?;
        if !status.is_success() {
            anyhow::bail!("notion request failed ({status}): {payload}");
        }
        Ok(payload)
    }
}

#[async_trait]
impl Publisher for NotionPublisher {
    async fn publish(&self, post: &PostDraft) -> anyhow::Result<PublishedPage> {
        let blocks = markdown_to_blocks(&post.content);
        let mut chunks = blocks.chunks(NOTION_MAX_CHILDREN);
        let first = chunks.next().unwrap_or(&[]);

        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": page_properties(&post.title, &post.tags),
            "children": first,
        });
        let payload = self
            .send(self.client.post(format!("{}/pages", self.base_url)), &body)
            .await
            .context("create notion page")?;

        let Some(page_id) = payload.get("id").and_then(Value::as_str) else {
            anyhow::bail!("notion page was not created: {payload}");
        };

        for chunk in chunks {
            let url = format!("{}/blocks/{page_id}/children", self.base_url);
            self.send(self.client.patch(url), &json!({ "children": chunk }))
                .await
                .context("append notion blocks")?;
        }

        Ok(PublishedPage {
            page_id: page_id.to_owned(),
            url: payload
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            public_url: payload
                .get("public_url")
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }
}

fn page_properties(title: &str, tags: &PostTags) -> Value {
    let multi_select = |values: &[String]| {
        json!({
            "multi_select": values.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>()
        })
    };
    json!({
        "title": { "title": [{ "text": { "content": title } }] },
        "Question_Type": multi_select(&tags.question_type),
        "OS_Tags": multi_select(&tags.os),
        "Framework_Tags": multi_select(&tags.framework),
        "Language_Tags": multi_select(&tags.language),
        "Tech_Stack_Tags": multi_select(&tags.tech_stack),
    })
}

enum BlockKind {
    Heading(u8),
    Paragraph,
    BulletedItem,
    Code(&'static str),
}

struct PendingBlock {
    kind: BlockKind,
    text: String,
}

/// Converts Markdown into Notion blocks: headings 1 to 3, bulleted list items,
/// code blocks and paragraphs. Inline markup is flattened to plain text.
pub fn markdown_to_blocks(markdown: &str) -> Vec<Value> {
    let mut blocks = Vec::new();
    let mut pending: Option<PendingBlock> = None;

    for event in Parser::new_ext(markdown, Options::ENABLE_STRIKETHROUGH) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                start_block(&mut blocks, &mut pending, BlockKind::Heading(heading_level(level)));
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => notion_language(&info),
                    CodeBlockKind::Indented => "plain text",
                };
                start_block(&mut blocks, &mut pending, BlockKind::Code(language));
            }
            Event::Start(Tag::Item) => {
                start_block(&mut blocks, &mut pending, BlockKind::BulletedItem);
            }
            Event::Start(Tag::Paragraph) if pending.is_none() => {
                start_block(&mut blocks, &mut pending, BlockKind::Paragraph);
            }
            Event::End(TagEnd::Heading(_) | TagEnd::CodeBlock | TagEnd::Item) => {
                flush(&mut blocks, &mut pending);
            }
            Event::End(TagEnd::Paragraph)
                if matches!(pending, Some(PendingBlock { kind: BlockKind::Paragraph, .. })) =>
            {
                flush(&mut blocks, &mut pending);
            }
            Event::Text(text) | Event::Code(text) => {
                pending
                    .get_or_insert_with(|| PendingBlock {
                        kind: BlockKind::Paragraph,
                        text: String::new(),
                    })
                    .text
                    .push_str(&text);
            }
            Event::SoftBreak => {
                if let Some(block) = pending.as_mut() {
                    block.text.push(' ');
                }
            }
            Event::HardBreak => {
                if let Some(block) = pending.as_mut() {
                    block.text.push('\n');
                }
            }
            _ => {}
        }
    }
    flush(&mut blocks, &mut pending);

    blocks
}

fn start_block(blocks: &mut Vec<Value>, pending: &mut Option<PendingBlock>, kind: BlockKind) {
    flush(blocks, pending);
    *pending = Some(PendingBlock {
        kind,
        text: String::new(),
    });
}

fn flush(blocks: &mut Vec<Value>, pending: &mut Option<PendingBlock>) {
    let Some(block) = pending.take() else {
        return;
    };

    let (block_type, body) = match block.kind {
        BlockKind::Code(language) => {
            let text = block.text.trim_end_matches('\n');
            (
                "code",
                json!({ "rich_text": rich_text(text), "language": language }),
            )
        }
        kind => {
            let text = block.text.trim();
            if text.is_empty() {
                return;
            }
            let block_type = match kind {
                BlockKind::Heading(1) => "heading_1",
                BlockKind::Heading(2) => "heading_2",
                BlockKind::Heading(_) => "heading_3",
                BlockKind::BulletedItem => "bulleted_list_item",
                _ => "paragraph",
            };
            (block_type, json!({ "rich_text": rich_text(text) }))
        }
    };

    blocks.push(json!({
        "object": "block",
        "type": block_type,
        block_type: body,
    }));
}

/// Notion caps a single text object at 2000 characters.
fn rich_text(text: &str) -> Vec<Value> {
    let chars = text.chars().collect::<Vec<_>>();
    chars
        .chunks(NOTION_MAX_TEXT)
        .map(|chunk| {
            json!({
                "type": "text",
                "text": { "content": chunk.iter().collect::<String>() }
            })
        })
        .collect()
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        _ => 3,
    }
}

fn notion_language(info: &str) -> &'static str {
    let lang = info.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
    match lang.as_str() {
        "rust" | "rs" => "rust",
        "python" | "py" => "python",
        "javascript" | "js" | "jsx" => "javascript",
        "typescript" | "ts" | "tsx" => "typescript",
        "bash" | "sh" | "shell" | "zsh" | "console" => "shell",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "go" | "golang" => "go",
        "java" => "java",
        "kotlin" | "kt" => "kotlin",
        "c" => "c",
        "cpp" | "c++" => "c++",
        "csharp" | "cs" | "c#" => "c#",
        "sql" => "sql",
        "html" => "html",
        "css" => "css",
        "dockerfile" | "docker" => "docker",
        "markdown" | "md" => "markdown",
        _ => "plain text",
    }
}
