#![no_main]

use docbuild_duration::ScheduleSpec;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(spec) = data.parse::<ScheduleSpec>() {
        // A parsed schedule must display to something that re-parses to
        // the same schedule.
        let rendered = spec.to_string();
        let reparsed: ScheduleSpec = rendered.parse().expect("display output must re-parse");
        assert_eq!(reparsed, spec);
    }
});
