//! Chat system prompt assembly.

pub fn build_system_prompt(org_id: &str, tool_names: &[String]) -> String {
    let tool_block = if tool_names.is_empty() {
        "You have no tools available in this session.".to_string()
    } else {
        format!(
            "You can call these tools when the user's question needs live data:\n{}",
            tool_names
                .iter()
                .map(|name| format!("- {}", name))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    format!(
        "You are the context library assistant for organization {org_id}. You help the team \
         inspect and improve their generated context documents: SQL reference docs, \
         configuration references, wiki imports, and the organization's context tree.\n\n\
         {tool_block}\n\n\
         Guidelines:\n\
         - Prefer fetching real data over guessing; cite document names when you quote them.\n\
         - Answers should be concise markdown.\n\
         - If a tool returns an error or a permission denial, tell the user plainly and move on."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_tools() {
        let prompt = build_system_prompt("42", &["list_context_docs".to_string()]);
        assert!(prompt.contains("organization 42"));
        assert!(prompt.contains("- list_context_docs"));

        let bare = build_system_prompt("42", &[]);
        assert!(bare.contains("no tools available"));
    }
}
