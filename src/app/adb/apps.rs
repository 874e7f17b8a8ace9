/// Package names from `pm list packages` output. Lines from `pm list packages -f`
/// (`package:<apk path>=<name>`) yield the name after the last `=`.
pub fn parse_pm_list_packages_output(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let payload = line.strip_prefix("package:").unwrap_or(line).trim();
            let name = match payload.rsplit_once('=') {
                Some((_, name)) => name.trim(),
                None => payload,
            };
            if name.is_empty() || name.contains(char::is_whitespace) {
                return None;
            }
            Some(name.to_string())
        })
        .collect()
}

/// Exact identifier match: `com.example` must not match `com.example.debug`.
pub fn is_package_installed(output: &str, package_name: &str) -> bool {
    parse_pm_list_packages_output(output)
        .iter()
        .any(|name| name == package_name)
}
