//! Web search and page reading tools

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use sage_agent::tool::{Tool, ToolError, ToolOutput, int_arg, opt_str_arg, str_arg};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::until_cancelled;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const TAVILY_URL: &str = "https://api.tavily.com/search";

const MAX_PAGE_CHARS: usize = 10_000;
const MAX_LINKS: usize = 50;
const MAX_OCCURRENCES: usize = 10;

static HIDDEN_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["script", "style", "nav", "footer", "header"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b.*?</{tag}\s*>")).expect("valid block regex")
        })
        .collect()
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<a\b[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))[^>]*>(.*?)</a\s*>"#,
    )
    .expect("valid anchor regex")
});

/// Build the HTTP client shared by the web tools
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .build()
}

/// Basic HTML entity decoding.
fn html_decode(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Visible text of a page as trimmed, non-empty fragments
fn text_fragments(html: &str) -> Vec<String> {
    let mut body = html.to_string();
    for block in HIDDEN_BLOCKS.iter() {
        body = block.replace_all(&body, " ").into_owned();
    }
    TAG_RE
        .split(&body)
        .flat_map(|chunk| chunk.lines().map(str::to_string).collect::<Vec<_>>())
        .map(|line| html_decode(line.trim()).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Keep the first `max` characters, noting the original length
fn truncate_page(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}\n\n[Content truncated - {} total characters]", head, total)
}

/// `(text, href)` for every anchor, relative paths resolved against `base`
fn anchor_links(html: &str, base: &str) -> Vec<(String, String)> {
    let base = Url::parse(base).ok();
    ANCHOR_RE
        .captures_iter(html)
        .filter_map(|caps| {
            let href = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))?
                .as_str();
            let mut href = html_decode(href.trim());
            if href.starts_with('/') {
                if let Some(joined) = base.as_ref().and_then(|b| b.join(&href).ok()) {
                    href = joined.to_string();
                }
            }
            let inner = caps.get(4).map_or("", |m| m.as_str());
            let text = html_decode(TAG_RE.replace_all(inner, "").trim());
            Some((text.trim().to_string(), href))
        })
        .collect()
}

/// Case-insensitive matches of `term` in `text`, each with surrounding context
fn find_occurrences(text: &str, term: &str, context_chars: usize) -> Vec<String> {
    let fold = |c: char| c.to_lowercase().next().unwrap_or(c);
    let chars: Vec<char> = text.chars().collect();
    let haystack: Vec<char> = chars.iter().map(|&c| fold(c)).collect();
    let needle: Vec<char> = term.chars().map(fold).collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }

    let mut found = Vec::new();
    for pos in 0..=haystack.len() - needle.len() {
        if haystack[pos..pos + needle.len()] != needle[..] {
            continue;
        }
        let start = pos.saturating_sub(context_chars);
        let end = (pos + needle.len() + context_chars).min(chars.len());
        let mut context: String = chars[start..end].iter().collect();
        if start > 0 {
            context.insert_str(0, "...");
        }
        if end < chars.len() {
            context.push_str("...");
        }
        found.push(context);
    }
    found
}

/// GET a page body, failing on non-success statuses
async fn fetch(http: &reqwest::Client, url: &str) -> Result<String, ToolError> {
    let response = http.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ToolError::execution(format!(
                "Request to {} timed out after {} seconds",
                url,
                FETCH_TIMEOUT.as_secs()
            ))
        } else {
            ToolError::execution(format!("Failed to fetch {}: {}", url, e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ToolError::execution(format!(
            "Failed to fetch {}: HTTP {}",
            url, status
        )));
    }
    response
        .text()
        .await
        .map_err(|e| ToolError::execution(format!("Failed to read {}: {}", url, e)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    answer: Option<String>,
    results: Vec<SearchHit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchHit {
    title: Option<String>,
    url: Option<String>,
    content: Option<String>,
}

fn format_search(response: &SearchResponse) -> String {
    let mut lines = Vec::new();
    if let Some(answer) = response.answer.as_deref().filter(|a| !a.is_empty()) {
        lines.push(format!("Quick Answer: {}\n", answer));
    }
    lines.push("Search Results:".to_string());
    for (i, hit) in response.results.iter().enumerate() {
        lines.push(format!(
            "\n{}. {}",
            i + 1,
            hit.title.as_deref().unwrap_or("No title")
        ));
        lines.push(format!("   URL: {}", hit.url.as_deref().unwrap_or("")));
        lines.push(format!(
            "   {}",
            hit.content.as_deref().unwrap_or("No content available")
        ));
    }
    lines.join("\n")
}

/// Tavily search API client
#[derive(Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl SearchClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }

    async fn search(&self, query: &str, max_results: i64) -> ToolOutput {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ToolError::execution(
                "TAVILY_API_KEY not found in environment variables. \
                 Please add it to your .env file or the [api_keys] section of the config.",
            ));
        };

        tracing::debug!(query, max_results, "web search");
        let body = json!({
            "api_key": api_key,
            "query": query,
            "max_results": max_results,
            "include_answer": true,
            "include_raw_content": false,
        });

        let response = self
            .http
            .post(TAVILY_URL)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::execution(format!("Web search failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::execution(format!(
                "Web search failed (HTTP {}): {}",
                status, text
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ToolError::execution(format!("Invalid search response: {}", e)))?;
        Ok(format_search(&parsed))
    }
}

pub struct WebSearchTool {
    client: SearchClient,
}

impl WebSearchTool {
    pub fn new(client: SearchClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns a short answer when available plus titles, URLs and snippets."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query" },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default: 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let query = str_arg(&arguments, "query")?;
        let max_results = int_arg(&arguments, "max_results", 5)?.clamp(1, 20);
        until_cancelled(&cancel, self.client.search(query, max_results)).await
    }
}

pub struct WikipediaSearchTool {
    client: SearchClient,
}

impl WikipediaSearchTool {
    pub fn new(client: SearchClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WikipediaSearchTool {
    fn name(&self) -> &str {
        "web_search_wikipedia"
    }

    fn description(&self) -> &str {
        "Search Wikipedia. Useful for historical and factual questions; \
         pass a year to focus on a specific version of the facts."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query" },
                "year": {
                    "type": "integer",
                    "description": "Optional year to focus the search on"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let query = str_arg(&arguments, "query")?;
        let mut wiki_query = format!("{} site:wikipedia.org", query);
        if let Some(year) = arguments.get("year").and_then(Value::as_i64) {
            wiki_query.push_str(&format!(" {}", year));
        }
        until_cancelled(&cancel, self.client.search(&wiki_query, 3)).await
    }
}

pub struct ReadUrlTool {
    http: reqwest::Client,
}

impl ReadUrlTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Tool for ReadUrlTool {
    fn name(&self) -> &str {
        "read_url"
    }

    fn description(&self) -> &str {
        "Read a web page and return its visible text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to read" },
                "extract_text_only": {
                    "type": "boolean",
                    "description": "Return only text (default: true); false returns raw HTML"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let url = str_arg(&arguments, "url")?;
        let text_only = arguments
            .get("extract_text_only")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let html = until_cancelled(&cancel, fetch(&self.http, url)).await?;
        let content = if text_only {
            truncate_page(&text_fragments(&html).join("\n"), MAX_PAGE_CHARS)
        } else {
            html.chars().take(MAX_PAGE_CHARS).collect()
        };
        Ok(format!("Content from {}:\n\n{}", url, content))
    }
}

pub struct ExtractLinksTool {
    http: reqwest::Client,
}

impl ExtractLinksTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Tool for ExtractLinksTool {
    fn name(&self) -> &str {
        "extract_links"
    }

    fn description(&self) -> &str {
        "List the links on a web page, optionally only those whose text or URL contains a filter."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The page to extract links from" },
                "filter_text": {
                    "type": "string",
                    "description": "Only return links containing this text"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let url = str_arg(&arguments, "url")?;
        let filter = opt_str_arg(&arguments, "filter_text")
            .filter(|f| !f.is_empty())
            .map(str::to_lowercase);

        let html = until_cancelled(&cancel, fetch(&self.http, url)).await?;
        let links: Vec<String> = anchor_links(&html, url)
            .into_iter()
            .filter(|(text, href)| match &filter {
                Some(f) => href.to_lowercase().contains(f) || text.to_lowercase().contains(f),
                None => href.starts_with("http"),
            })
            .map(|(text, href)| format!("{}: {}", text, href))
            .collect();

        if links.is_empty() {
            return Ok("No links found matching the criteria.".to_string());
        }

        let mut result = format!("Found {} links on {}:\n\n", links.len(), url);
        result.push_str(&links[..links.len().min(MAX_LINKS)].join("\n"));
        if links.len() > MAX_LINKS {
            result.push_str(&format!(
                "\n\n[{} more links not shown]",
                links.len() - MAX_LINKS
            ));
        }
        Ok(result)
    }
}

pub struct SearchInDocumentTool {
    http: reqwest::Client,
}

impl SearchInDocumentTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Tool for SearchInDocumentTool {
    fn name(&self) -> &str {
        "search_in_document"
    }

    fn description(&self) -> &str {
        "Find a term in a web page and return every occurrence with surrounding context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The page to search" },
                "search_term": { "type": "string", "description": "The text to search for" },
                "context_chars": {
                    "type": "integer",
                    "description": "Characters of context before and after each match (default: 200)"
                }
            },
            "required": ["url", "search_term"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let url = str_arg(&arguments, "url")?;
        let term = str_arg(&arguments, "search_term")?;
        let context_chars = int_arg(&arguments, "context_chars", 200)?.max(0) as usize;

        let html = until_cancelled(&cancel, fetch(&self.http, url)).await?;
        let text = text_fragments(&html).join(" ");
        let occurrences = find_occurrences(&text, term, context_chars);

        if occurrences.is_empty() {
            return Ok(format!("'{}' not found in {}", term, url));
        }

        let mut result = format!(
            "Found {} occurrence(s) of '{}' in {}:\n\n",
            occurrences.len(),
            term,
            url
        );
        for (i, occurrence) in occurrences.iter().take(MAX_OCCURRENCES).enumerate() {
            result.push_str(&format!("{}. {}\n\n", i + 1, occurrence));
        }
        if occurrences.len() > MAX_OCCURRENCES {
            result.push_str(&format!(
                "[{} more occurrences not shown]",
                occurrences.len() - MAX_OCCURRENCES
            ));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<html><head><title>Moon</title><style>p { color: red; }</style></head>
<body>
<header><a href="/home">Home</a></header>
<nav>Menu</nav>
<h1>Apollo 11</h1>
<p>Landed in <b>1969</b> &amp; returned safely.</p>
<script>var x = "<p>hidden</p>";</script>
<a href="https://example.org/a">First</a>
<a class="x" href='/wiki/Moon'><span>Moon</span> page</a>
<a href="#top">Top</a>
<footer>Copyright</footer>
</body></html>"##;

    #[test]
    fn test_text_fragments_skip_hidden_blocks() {
        let text = text_fragments(PAGE).join("\n");
        assert!(text.contains("Apollo 11"));
        assert!(text.contains("Landed in\n1969\n& returned safely."));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains("Menu"));
        assert!(!text.contains("Copyright"));
        assert!(!text.contains("Home"));
    }

    #[test]
    fn test_truncate_page() {
        assert_eq!(truncate_page("short", 10), "short");
        let long = "é".repeat(12);
        assert_eq!(
            truncate_page(&long, 10),
            format!("{}\n\n[Content truncated - 12 total characters]", "é".repeat(10))
        );
    }

    #[test]
    fn test_anchor_links_resolve_relative_paths() {
        let links = anchor_links(PAGE, "https://en.wikipedia.org/wiki/Apollo");
        assert!(links.contains(&("First".into(), "https://example.org/a".into())));
        assert!(links.contains(&(
            "Moon page".into(),
            "https://en.wikipedia.org/wiki/Moon".into()
        )));
        assert!(links.contains(&("Top".into(), "#top".into())));
        assert!(links.contains(&("Home".into(), "https://en.wikipedia.org/home".into())));
    }

    #[test]
    fn test_find_occurrences_with_context() {
        let text = "The Moon landing. Later, the moon rover.";
        let found = find_occurrences(text, "MOON", 4);
        assert_eq!(found, vec!["The Moon lan...", "...the moon rov..."]);
        assert!(find_occurrences(text, "mars", 4).is_empty());
        assert!(find_occurrences(text, "", 4).is_empty());
    }

    #[test]
    fn test_format_search() {
        let response = SearchResponse {
            answer: Some("1969".into()),
            results: vec![SearchHit {
                title: Some("Apollo 11".into()),
                url: Some("https://example.org".into()),
                content: None,
            }],
        };
        assert_eq!(
            format_search(&response),
            "Quick Answer: 1969\n\nSearch Results:\n\n1. Apollo 11\n   URL: https://example.org\n   No content available"
        );
    }

    #[test]
    fn test_search_response_tolerates_missing_fields() {
        let parsed: SearchResponse = serde_json::from_str(r#"{"results": [{}]}"#).unwrap();
        assert_eq!(parsed.answer, None);
        assert_eq!(
            format_search(&parsed),
            "Search Results:\n\n1. No title\n   URL: \n   No content available"
        );
    }

    #[tokio::test]
    async fn test_search_without_key_fails() {
        let client = SearchClient::new(http_client().unwrap(), None);
        let tool = WebSearchTool::new(client);
        let err = tool
            .execute(json!({"query": "apollo"}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(m) if m.starts_with("TAVILY_API_KEY not found")));
    }
}
