use chrono::Utc;

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

/// UTC timestamp stamped into report headers.
pub fn report_stamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_trims_and_filters() {
        let parts = split_csv(" door, ,reset,  chaos ");
        assert_eq!(parts, vec!["door", "reset", "chaos"]);
    }

    #[test]
    fn report_stamp_is_utc() {
        let stamp = report_stamp();
        assert!(stamp.ends_with('Z'));
        assert_eq!(stamp.len(), 20);
    }
}
