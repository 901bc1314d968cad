#![no_main]

use hpcload::workflow_tag::WorkflowTag;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(name) = std::str::from_utf8(data) {
        // Decoding must never panic, and whatever decodes must encode back
        // to a name that decodes to the same tag
        if let Ok(tag) = WorkflowTag::parse_job_name(name) {
            let again = WorkflowTag::parse_job_name(&tag.to_job_name())
                .expect("re-encoded tag must decode");
            assert_eq!(again, tag);
        }
    }
});
