//! Text utilities for word puzzles and small reasoning tasks

use async_trait::async_trait;
use regex::Regex;
use sage_agent::tool::{Tool, ToolError, ToolOutput, str_arg};
use serde_json::{Value, json};
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid number regex"));

/// Word -> antonym, both directions listed
#[rustfmt::skip]
const ANTONYMS: &[(&str, &str)] = &[
    ("hot", "cold"), ("cold", "hot"),
    ("big", "small"), ("small", "big"),
    ("large", "small"), ("tiny", "huge"),
    ("tall", "short"), ("short", "tall"),
    ("long", "short"),
    ("wide", "narrow"), ("narrow", "wide"),
    ("thick", "thin"), ("thin", "thick"),
    ("heavy", "light"), ("light", "heavy"),
    ("hard", "soft"), ("soft", "hard"),
    ("strong", "weak"), ("weak", "strong"),
    ("fast", "slow"), ("slow", "fast"),
    ("quick", "slow"),
    ("high", "low"), ("low", "high"),
    ("deep", "shallow"), ("shallow", "deep"),
    ("loud", "quiet"), ("quiet", "loud"),
    ("bright", "dark"), ("dark", "bright"),
    ("clean", "dirty"), ("dirty", "clean"),
    ("new", "old"), ("old", "new"),
    ("young", "old"),
    ("early", "late"), ("late", "early"),
    ("near", "far"), ("far", "near"),
    ("start", "stop"), ("stop", "start"),
    ("begin", "end"), ("end", "begin"),
    ("open", "close"), ("close", "open"),
    ("push", "pull"), ("pull", "push"),
    ("give", "take"), ("take", "give"),
    ("buy", "sell"), ("sell", "buy"),
    ("love", "hate"), ("hate", "love"),
    ("win", "lose"), ("lose", "win"),
    ("remember", "forget"), ("forget", "remember"),
    ("always", "never"), ("never", "always"),
    ("often", "rarely"), ("rarely", "often"),
    ("up", "down"), ("down", "up"),
    ("in", "out"), ("out", "in"),
    ("inside", "outside"), ("outside", "inside"),
    ("before", "after"), ("after", "before"),
    ("above", "below"), ("below", "above"),
    ("over", "under"), ("under", "over"),
    ("day", "night"), ("night", "day"),
    ("summer", "winter"), ("winter", "summer"),
    ("friend", "enemy"), ("enemy", "friend"),
    ("question", "answer"), ("answer", "question"),
    ("beginning", "end"),
    ("front", "back"), ("back", "front"),
    ("top", "bottom"), ("bottom", "top"),
];

/// Botanical fruits: develop from the flower and carry seeds
#[rustfmt::skip]
const FRUITS: &[&str] = &[
    "tomato", "cucumber", "pepper", "bell pepper", "eggplant", "aubergine",
    "squash", "zucchini", "pumpkin", "avocado", "olive", "okra",
    "apple", "banana", "orange", "grape", "strawberry", "blueberry",
    "peach", "pear", "plum", "cherry", "watermelon", "melon",
    "mango", "pineapple", "papaya", "kiwi", "lemon", "lime",
    "bean", "green bean", "pea", "peas", "corn", "maize",
];

/// Other edible plant parts: leaves, stems, roots, bulbs
#[rustfmt::skip]
const VEGETABLES: &[&str] = &[
    "carrot", "potato", "onion", "garlic", "lettuce", "spinach",
    "cabbage", "broccoli", "cauliflower", "celery", "asparagus",
    "radish", "beet", "turnip", "parsnip", "kale", "chard",
    "leek", "scallion", "artichoke", "rhubarb",
];

fn text_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "text": { "type": "string", "description": description }
        },
        "required": ["text"]
    })
}

pub struct ReverseTextTool;

#[async_trait]
impl Tool for ReverseTextTool {
    fn name(&self) -> &str {
        "reverse_text"
    }

    fn description(&self) -> &str {
        "Reverse a text string character by character."
    }

    fn parameters_schema(&self) -> Value {
        text_schema("Text to reverse")
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        let text = str_arg(&arguments, "text")?;
        Ok(format!("Reversed: {}", text.chars().rev().collect::<String>()))
    }
}

pub struct ReverseWordsTool;

#[async_trait]
impl Tool for ReverseWordsTool {
    fn name(&self) -> &str {
        "reverse_words"
    }

    fn description(&self) -> &str {
        "Reverse the order of the words in a text."
    }

    fn parameters_schema(&self) -> Value {
        text_schema("Text whose words should be reversed")
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        let text = str_arg(&arguments, "text")?;
        let words: Vec<&str> = text.split_whitespace().rev().collect();
        Ok(words.join(" "))
    }
}

pub struct WordAtPositionTool;

#[async_trait]
impl Tool for WordAtPositionTool {
    fn name(&self) -> &str {
        "get_word_at_position"
    }

    fn description(&self) -> &str {
        "Get the word at a 1-indexed position in a text (1 = first word)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "The text to search" },
                "position": {
                    "type": "integer",
                    "description": "Position of the word, starting at 1"
                }
            },
            "required": ["text", "position"]
        })
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        let text = str_arg(&arguments, "text")?;
        let position = arguments
            .get("position")
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::invalid("'position' must be an integer"))?;

        let words: Vec<&str> = text.split_whitespace().collect();
        if position < 1 || position as usize > words.len() {
            return Err(ToolError::execution(format!(
                "Position {} is out of range. Text has {} words.",
                position,
                words.len()
            )));
        }
        Ok(format!(
            "Word at position {}: {}",
            position,
            words[position as usize - 1]
        ))
    }
}

pub struct FindAntonymTool;

#[async_trait]
impl Tool for FindAntonymTool {
    fn name(&self) -> &str {
        "find_antonym"
    }

    fn description(&self) -> &str {
        "Look up the antonym of a common English word."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "word": { "type": "string", "description": "Word to find the antonym of" }
            },
            "required": ["word"]
        })
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        let word = str_arg(&arguments, "word")?;
        let lower = word.to_lowercase();
        match ANTONYMS.iter().find(|(w, _)| *w == lower) {
            Some((_, antonym)) => Ok(format!("Antonym of '{}': {}", word, antonym)),
            None => Ok(format!(
                "No built-in antonym found for '{}'. This tool has {} common antonym pairs. \
                 For other words, use web search or ask the LLM directly.",
                word,
                ANTONYMS.len() / 2
            )),
        }
    }
}

pub struct CheckPalindromeTool;

#[async_trait]
impl Tool for CheckPalindromeTool {
    fn name(&self) -> &str {
        "check_palindrome"
    }

    fn description(&self) -> &str {
        "Check whether a text reads the same backwards, ignoring spaces and case."
    }

    fn parameters_schema(&self) -> Value {
        text_schema("Text to check")
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        let text = str_arg(&arguments, "text")?;
        let clean: Vec<char> = text.replace(' ', "").to_lowercase().chars().collect();
        let is_palindrome = clean.iter().eq(clean.iter().rev());
        if is_palindrome {
            Ok(format!("'{}' IS a palindrome", text))
        } else {
            Ok(format!("'{}' is NOT a palindrome", text))
        }
    }
}

pub struct CountWordsTool;

#[async_trait]
impl Tool for CountWordsTool {
    fn name(&self) -> &str {
        "count_words"
    }

    fn description(&self) -> &str {
        "Count the whitespace-separated words in a text."
    }

    fn parameters_schema(&self) -> Value {
        text_schema("Text to count words in")
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        let text = str_arg(&arguments, "text")?;
        Ok(format!("Word count: {}", text.split_whitespace().count()))
    }
}

pub struct ExtractNumbersTool;

#[async_trait]
impl Tool for ExtractNumbersTool {
    fn name(&self) -> &str {
        "extract_numbers"
    }

    fn description(&self) -> &str {
        "Extract every run of digits from a text."
    }

    fn parameters_schema(&self) -> Value {
        text_schema("Text to extract numbers from")
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        let text = str_arg(&arguments, "text")?;
        let numbers: Vec<&str> = NUMBER_RE.find_iter(text).map(|m| m.as_str()).collect();
        if numbers.is_empty() {
            Ok("No numbers found in text".to_string())
        } else {
            Ok(format!("Numbers found: {}", numbers.join(", ")))
        }
    }
}

pub struct CategorizeProduceTool;

#[async_trait]
impl Tool for CategorizeProduceTool {
    fn name(&self) -> &str {
        "categorize_fruits_vegetables"
    }

    fn description(&self) -> &str {
        "Classify food items as botanical fruits or vegetables."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Food items to categorize"
                }
            },
            "required": ["items"]
        })
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        let items = arguments
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::invalid("'items' must be an array of strings"))?;

        let lines: Vec<String> = items
            .iter()
            .filter_map(Value::as_str)
            .map(|item| {
                let key = item.trim().to_lowercase();
                let category = if FRUITS.contains(&key.as_str()) {
                    "FRUIT (botanical)"
                } else if VEGETABLES.contains(&key.as_str()) {
                    "VEGETABLE (botanical)"
                } else {
                    "UNKNOWN (not in database)"
                };
                format!("{}: {}", item, category)
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(tool: &dyn Tool, args: Value) -> ToolOutput {
        tool.execute(args, CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_reverse_text() {
        let out = run(&ReverseTextTool, json!({"text": "abc"})).await.unwrap();
        assert_eq!(out, "Reversed: cba");
    }

    #[tokio::test]
    async fn test_reverse_words() {
        let out = run(&ReverseWordsTool, json!({"text": "one  two three"}))
            .await
            .unwrap();
        assert_eq!(out, "three two one");
    }

    #[tokio::test]
    async fn test_word_at_position() {
        let out = run(
            &WordAtPositionTool,
            json!({"text": "the quick brown fox", "position": 3}),
        )
        .await
        .unwrap();
        assert_eq!(out, "Word at position 3: brown");

        let err = run(&WordAtPositionTool, json!({"text": "a b", "position": 5}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::Execution("Position 5 is out of range. Text has 2 words.".into())
        );
    }

    #[tokio::test]
    async fn test_find_antonym() {
        let out = run(&FindAntonymTool, json!({"word": "Left"})).await.unwrap();
        assert!(out.starts_with("No built-in antonym found for 'Left'"));
        assert!(out.contains("43 common antonym pairs"));

        let out = run(&FindAntonymTool, json!({"word": "Hot"})).await.unwrap();
        assert_eq!(out, "Antonym of 'Hot': cold");

        let out = run(&FindAntonymTool, json!({"word": "close"})).await.unwrap();
        assert_eq!(out, "Antonym of 'close': open");
    }

    #[tokio::test]
    async fn test_check_palindrome() {
        let out = run(&CheckPalindromeTool, json!({"text": "Never odd or even"}))
            .await
            .unwrap();
        assert_eq!(out, "'Never odd or even' IS a palindrome");

        let out = run(&CheckPalindromeTool, json!({"text": "sage"})).await.unwrap();
        assert_eq!(out, "'sage' is NOT a palindrome");
    }

    #[tokio::test]
    async fn test_count_words() {
        let out = run(&CountWordsTool, json!({"text": " a b\tc\n"})).await.unwrap();
        assert_eq!(out, "Word count: 3");
    }

    #[tokio::test]
    async fn test_extract_numbers() {
        let out = run(&ExtractNumbersTool, json!({"text": "In 1969, 3 men flew 384400 km"}))
            .await
            .unwrap();
        assert_eq!(out, "Numbers found: 1969, 3, 384400");

        let out = run(&ExtractNumbersTool, json!({"text": "none"})).await.unwrap();
        assert_eq!(out, "No numbers found in text");
    }

    #[tokio::test]
    async fn test_categorize() {
        let out = run(
            &CategorizeProduceTool,
            json!({"items": ["Tomato", "carrot", "chocolate"]}),
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            "Tomato: FRUIT (botanical)\ncarrot: VEGETABLE (botanical)\nchocolate: UNKNOWN (not in database)"
        );
    }
}
