use serde::{Deserialize, Serialize};

pub const AUDITOR_SYSTEM: &str = r#"You are a Python code auditor. You read source files together with their pylint results and report the real problems you find.

RULES:
1. Do NOT modify any code.
2. Do NOT invent issues. Report only problems that are visible in the code or reported by pylint.
3. Give line numbers whenever possible.
4. Be concise, objective and technical.

ISSUE TYPES (use exactly one of these):
"bug", "syntax_error", "logic_error", "missing_docstring", "pep8_violation",
"security_issue", "performance", "import_error", "unused_variable", "naming_convention"

SEVERITY:
- "high": the code crashes, fails to run, or is a security risk
- "medium": the code runs but has significant problems
- "low": style, readability or documentation

OUTPUT FORMAT (JSON only, no markdown, no prose):
{
  "files_analyzed": ["example.py"],
  "total_issues": 1,
  "issues": [
    {
      "file": "example.py",
      "line": 12,
      "severity": "high",
      "type": "syntax_error",
      "message": "Invalid function definition syntax.",
      "recommendation": "Add the missing comma between the parameters."
    }
  ],
  "recommendations": ["Fix syntax errors before refactoring"]
}

Every analyzed file MUST appear in "files_analyzed", even with zero issues. Do not repeat source code in the output."#;

pub const FIXER_SYSTEM: &str = r#"You are a Python code fixer. You correct a source file strictly according to the audit issues you are given.

RULES:
1. Do NOT change the business logic.
2. Do NOT add features or remove existing functionality.
3. Do NOT rename functions, classes or variables.
4. Fix ONLY the listed issues. Keep imports unless an issue requires changing them.
5. Add docstrings only when an issue asks for them.
6. The result must be valid, runnable Python.

OUTPUT FORMAT:
Return ONLY the complete corrected Python source. No explanations, no comments about the changes, no markdown, no ```python fences.

EXAMPLE
Original:
def add(a b): return a+b
Issue: line 1, type "syntax_error"
Output:
def add(a, b):
    return a + b"#;

pub const JUDGE_SYSTEM: &str = r#"You are a Python test failure analyst. You receive raw pytest failure messages and diagnose them.

RULES:
1. Do NOT modify any code.
2. Analyze ONLY the messages you are given; do not invent failures.
3. Identify the error type (AssertionError, TypeError, NameError, ImportError, ...) and the most probable root cause.
4. Suggest what should be corrected, not how to code it.

SEVERITY:
- "high": tests fail on critical logic or runtime errors
- "medium": incorrect behavior but the code executes
- "low": minor issue, edge case or fragile test

OUTPUT FORMAT (JSON only, no markdown, no prose):
{
  "recommendations": ["Ensure add() returns an integer"],
  "root_causes": ["add() returns a string instead of an integer"],
  "severity": "high"
}"#;

/// User prompt asking for a pytest module covering `filename`.
pub fn generate_tests_prompt(filename: &str, code: &str) -> String {
    let module = filename.strip_suffix(".py").unwrap_or(filename);
    format!(
        r#"Write pytest unit tests for this Python module.

FILE: {filename}

CODE:
```python
{code}
```

INSTRUCTIONS:
1. Write at least 5 complete unit tests.
2. Import what you test from `{module}`.
3. Cover normal cases and error cases.
4. Name tests explicitly (test_<function>_<case>) and give each a docstring.
5. Use fixtures only where they help.

Return ONLY the test code."#
    )
}

/// User prompt asking for a Markdown README for `filename`.
pub fn generate_docs_prompt(filename: &str, code: &str) -> String {
    format!(
        r#"Write Markdown documentation for this Python module.

FILE: {filename}

CODE:
```python
{code}
```

Include:
1. Overview: what the module is for.
2. API: each public function and class with parameters and return values.
3. Examples: short, concrete usage snippets.
4. Dependencies: the imports it needs.

Return only the Markdown document. Be concise but complete."#
    )
}

/// System prompts handed to each agent at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub auditor: String,
    pub fixer: String,
    pub judge: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            auditor: AUDITOR_SYSTEM.to_string(),
            fixer: FIXER_SYSTEM.to_string(),
            judge: JUDGE_SYSTEM.to_string(),
        }
    }
}

/// Optional replacements read from the `[prompts]` config table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOverrides {
    pub auditor: Option<String>,
    pub fixer: Option<String>,
    pub judge: Option<String>,
}

impl Prompts {
    /// Defaults with any non-blank override swapped in.
    pub fn with_overrides(overrides: &PromptOverrides) -> Self {
        let pick = |custom: &Option<String>, default: &str| {
            custom
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            auditor: pick(&overrides.auditor, AUDITOR_SYSTEM),
            fixer: pick(&overrides.fixer, FIXER_SYSTEM),
            judge: pick(&overrides.judge, JUDGE_SYSTEM),
        }
    }
}
