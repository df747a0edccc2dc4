//! Reconstruction of before/after snippets from a unified diff.
//!
//! Status polling shows each fix as a before/after pair; the pair is rebuilt
//! by splitting the recorded diff into removed/added/context lines.

pub const NO_BEFORE: &str = "(No original snippet captured)";
pub const NO_AFTER: &str = "(No updated snippet captured)";

/// Split a unified diff into `(before, after)` snippets. Context lines appear
/// on both sides, `-` lines only before, `+` lines only after; headers and
/// hunk markers are dropped. Non-diff text (e.g. a rejection reason stored in
/// the diff field) lands on the after side with a placeholder before.
pub fn split_diff_before_after(diff_text: &str) -> (String, String) {
    if diff_text.trim().is_empty() {
        return (NO_BEFORE.to_string(), NO_AFTER.to_string());
    }

    let mut before_lines: Vec<&str> = Vec::new();
    let mut after_lines: Vec<&str> = Vec::new();

    for line in diff_text.lines() {
        if line.starts_with("diff --git")
            || line.starts_with("index ")
            || line.starts_with("@@")
            || line.starts_with("---")
            || line.starts_with("+++")
        {
            continue;
        }
        if let Some(removed) = line.strip_prefix('-') {
            before_lines.push(removed);
        } else if let Some(added) = line.strip_prefix('+') {
            after_lines.push(added);
        } else if let Some(context) = line.strip_prefix(' ') {
            before_lines.push(context);
            after_lines.push(context);
        }
    }

    let before = before_lines.join("\n").trim().to_string();
    let after = after_lines.join("\n").trim().to_string();

    if before.is_empty() && after.is_empty() {
        let clean = diff_text.trim();
        return (
            NO_BEFORE.to_string(),
            if clean.is_empty() {
                NO_AFTER.to_string()
            } else {
                clean.to_string()
            },
        );
    }

    (
        if before.is_empty() {
            NO_BEFORE.to_string()
        } else {
            before
        },
        if after.is_empty() {
            NO_AFTER.to_string()
        } else {
            after
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "\
diff --git a/app.py b/app.py
index e69de29..4b825dc 100644
--- a/app.py
+++ b/app.py
@@ -1,3 +1,3 @@
 def check(flag):
-    if flag == True:
+    if flag is True:
         return 1";

    #[test]
    fn splits_removed_and_added_with_context() {
        let (before, after) = split_diff_before_after(DIFF);
        assert!(before.contains("if flag == True:"));
        assert!(after.contains("if flag is True:"));
        assert!(before.contains("def check(flag):"));
        assert!(after.contains("def check(flag):"));
        assert!(!before.contains("diff --git"));
    }

    #[test]
    fn empty_diff_yields_placeholders() {
        let (before, after) = split_diff_before_after("");
        assert_eq!(before, NO_BEFORE);
        assert_eq!(after, NO_AFTER);
    }

    #[test]
    fn rejection_reason_lands_on_after_side() {
        let (before, after) = split_diff_before_after("Fix strategy produced no changes");
        assert_eq!(before, NO_BEFORE);
        assert_eq!(after, "Fix strategy produced no changes");
    }
}
