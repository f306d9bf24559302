//! Fixed instructions sent at the start of every conversation.

pub const SYSTEM_PROMPT: &str = "\
You are a senior developer implementing Python functions and classes from their declarations.
Follow these guidelines:

1. Structure:
   - Put every import statement in the 'imports' field.
   - Put the implementation in the 'code' field, without import statements.
   - Keep the declared name and signature.

2. Performance:
   - Aim for the lowest time and space complexity.
   - Pick data structures that fit the access pattern.

3. Quality:
   - Follow PEP 8 and keep type hints.
   - Comment only non-obvious logic.

Use the Reasoning tool to think before submitting, ReadSourceCode (when offered) to read the \
source of types the declaration depends on, and SubmitVersion to submit a complete implementation.";

/// Nudge sent when a turn carries no tool call.
pub const TOOL_REQUIRED: &str =
    "Respond by calling one of the offered tools. Use SubmitVersion to submit an implementation.";

pub const REASONING_ACK: &str = "Reasoning recorded.";

pub fn implementation_request(cleaned_source: &str) -> String {
    format!(
        "Implement the following function or class in Python.\n\
         Remember to separate imports and code.\n\
         Function or class to implement:\n{cleaned_source}"
    )
}

/// Feedback for a rejected attempt: failing test descriptions, or the load
/// error when the unit never compiled.
pub fn failure_feedback(failing: &[String], compile_error: Option<&str>) -> String {
    match compile_error {
        Some(error) => format!("Tests failed: the implementation could not be loaded.\n{error}"),
        None if failing.is_empty() => "Tests failed".to_string(),
        None => {
            let lines: Vec<String> = failing.iter().map(|d| format!("- {d}")).collect();
            format!("Tests failed:\n{}", lines.join("\n"))
        }
    }
}

pub fn unavailable_type(name: &str) -> String {
    format!("No source code is available for type `{name}`.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_contains_source() {
        let text = implementation_request("def f(x: int) -> int:\n    \"\"\"Double x\"\"\"\n");
        assert!(text.ends_with("def f(x: int) -> int:\n    \"\"\"Double x\"\"\"\n"));
    }

    #[test]
    fn test_failure_feedback() {
        assert_eq!(
            failure_feedback(&["f(3) == 6".into(), "f(0) == 0".into()], None),
            "Tests failed:\n- f(3) == 6\n- f(0) == 0"
        );
        assert!(failure_feedback(&[], Some("SyntaxError: invalid syntax"))
            .ends_with("SyntaxError: invalid syntax"));
        assert!(failure_feedback(&[], None).starts_with("Tests failed"));
    }
}
