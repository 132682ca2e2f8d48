#![no_main]

use libfuzzer_sys::fuzz_target;
use prdgen::templates::PromptTemplate;
use std::collections::HashMap;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let template = PromptTemplate::parse("fuzz", text);

    // Filling every declared variable must succeed and never panic.
    let fields: HashMap<String, String> = template
        .variables()
        .iter()
        .map(|v| (v.clone(), "x".to_string()))
        .collect();
    let _ = template.fill(&fields).expect("all variables supplied");

    // Dropping one variable must surface a missing-variable error.
    if let Some(first) = template.variables().first() {
        let mut partial = fields.clone();
        partial.remove(first);
        assert!(template.fill(&partial).is_err());
    }
});
