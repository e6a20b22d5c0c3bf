//! Prompt templates, one per backend style.
//!
//! Every template asks for a bare JSON array of flat objects so the merge
//! and format stages can treat all backends alike.

/// Which template a backend renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    OpenAi,
    Gemini,
    Local,
}

const CONTENT_SLOT: &str = "{content}";
const QUERY_SLOT: &str = "{query}";

const OPENAI_TEMPLATE: &str = r#"You extract structured data from web pages.
Read the page text below and answer the request with a JSON array of objects,
one object per item or row, whatever output format the request mentions.
Reply with the JSON array only: no prose, no explanation.

Example shape:
[
  {"field1": "value1", "field2": "value2"},
  {"field1": "value3", "field2": "value4"}
]

Rules:
- Include every field the request asks for; write "N/A" when a field is absent.
- Never invent values. Anything not present in the page text is "N/A".
- When the request names a number of entries, return at most that many.
- When the request asks for everything, return every entry you can find.
- Choose field names that fit both the page and the request.
- If the request asks what the page contains, answer with objects that
  describe the data and how it could be used.

Page text:
{content}

Request: {query}
"#;

const GEMINI_TEMPLATE: &str = r#"Task: structured extraction from web page text.

Output: exactly one JSON array of objects and nothing else. Each object is a
single item or data row. This holds even if the request mentions CSV, Excel,
SQL or HTML; conversion happens later.

[
  {"attribute1": "value1", "attribute2": "value2"}
]

Guidelines:
- Every requested attribute appears in every object; missing values are "N/A".
- Only report what the text states. Do not guess or fabricate.
- Respect any count in the request. "All" means all entries found.
- Attribute names should be short and descriptive.

Web page text:
{content}

User request: {query}
"#;

const LOCAL_TEMPLATE: &str = r#"Extract data from the web page text below.
Respond ONLY with a JSON array of objects. Do not wrap it in prose.
Use "N/A" for any requested field you cannot find, and do not make up data.
If the request gives a number of items, return that many at most.

Text:
{content}

Request: {query}

JSON array:
"#;

impl PromptStyle {
    pub fn template(self) -> &'static str {
        match self {
            PromptStyle::OpenAi => OPENAI_TEMPLATE,
            PromptStyle::Gemini => GEMINI_TEMPLATE,
            PromptStyle::Local => LOCAL_TEMPLATE,
        }
    }

    /// Fill the template. The query goes in first so page text containing
    /// a literal `{query}` is never substituted.
    pub fn render(self, content: &str, query: &str) -> String {
        self.template()
            .replacen(QUERY_SLOT, query, 1)
            .replacen(CONTENT_SLOT, content, 1)
    }
}
