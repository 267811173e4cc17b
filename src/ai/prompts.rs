/// Instructions for folder and file naming in a film production tree
pub const NAMING_INSTRUCTIONS: &str = r#"You are reviewing the folder and file names of a film production project.
Suggest clearer names where they help the editorial team find material.

RULES:
1. Folders are sequences or shots; keep their numbering (seq01, sh010) and add a short descriptive slug
2. Files keep their original extension
3. Use lowercase words joined by hyphens; no slashes or special characters
4. Only suggest a rename when it is a real improvement; skip nodes that are already well named
5. Address nodes ONLY by the handle shown in the listing (n1, n2, ...)

OUTPUT: Respond with ONLY valid JSON in this exact format:
{
  "suggestions": [
    {"handle": "n2", "name": "seq01-rooftop-chase", "reason": "adds the scene description"}
  ]
}"#;

/// Listing lines above this count are cut to keep the prompt bounded
pub const MAX_LISTED_NODES: usize = 400;

/// One node as shown to the model
pub struct PromptEntry<'a> {
    pub handle: &'a str,
    pub kind: &'a str,
    pub path: &'a str,
}

/// Build the naming prompt for one subtree
pub fn build_naming_prompt(project_name: &str, entries: &[PromptEntry<'_>]) -> String {
    let listed = entries.len().min(MAX_LISTED_NODES);
    let mut listing: Vec<String> = entries[..listed]
        .iter()
        .map(|e| format!("{} | {} | {}", e.handle, e.kind, e.path))
        .collect();

    if entries.len() > listed {
        listing.push(format!(
            "... ({} more nodes not shown)",
            entries.len() - listed
        ));
    }

    format!(
        r#"{}

PROJECT: {}

NODES (handle | kind | path):
{}

Output ONLY valid JSON."#,
        NAMING_INSTRUCTIONS,
        project_name,
        listing.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_handles() {
        let entries = [
            PromptEntry {
                handle: "n1",
                kind: "folder",
                path: "Nightfall/Sequences/seq01",
            },
            PromptEntry {
                handle: "n2",
                kind: "file",
                path: "Nightfall/Sequences/seq01/shotA.mov",
            },
        ];
        let prompt = build_naming_prompt("Nightfall", &entries);
        assert!(prompt.contains("n1 | folder | Nightfall/Sequences/seq01"));
        assert!(prompt.contains("n2 | file | Nightfall/Sequences/seq01/shotA.mov"));
        assert!(prompt.contains("PROJECT: Nightfall"));
    }

    #[test]
    fn test_prompt_truncates_long_listing() {
        let handles: Vec<String> = (0..MAX_LISTED_NODES + 5).map(|i| format!("n{}", i)).collect();
        let entries: Vec<PromptEntry> = handles
            .iter()
            .map(|h| PromptEntry {
                handle: h,
                kind: "folder",
                path: "p",
            })
            .collect();
        let prompt = build_naming_prompt("Big", &entries);
        assert!(prompt.contains("... (5 more nodes not shown)"));
    }
}
