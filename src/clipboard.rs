// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::process;

/// Mime-type namespacing for clipboard and drag-and-drop relaying.
///
/// Guest-advertised mime types are prefixed before they reach the host, so a
/// prefix-aware clipboard manager on the host can route content between guest
/// namespaces. Host-advertised types are only forwarded to the guest once the
/// prefix is stripped; types from a different namespace are dropped entirely.
#[derive(Clone, Debug)]
pub struct MimeNamespace {
    prefix: String,
}

impl MimeNamespace {
    /// `clipname` is the resolved configuration value: `Some("")` disables
    /// prefixing, `None` derives the per-process default.
    pub fn new(clipname: Option<String>) -> Self {
        Self {
            prefix: clipname.unwrap_or_else(|| format!("#PID{}#", process::id())),
        }
    }

    #[cfg(test)]
    fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn to_host(&self, mime_type: &str) -> String {
        format!("{}{}", self.prefix, mime_type)
    }

    /// `None` means the type belongs to a different namespace and the event
    /// carrying it must not be delivered.
    pub fn to_clients<'a>(&self, mime_type: &'a str) -> Option<&'a str> {
        mime_type.strip_prefix(self.prefix.as_str())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn prefixes_host_ward() {
        let ns = MimeNamespace::with_prefix("#PID1#");
        assert_eq!(ns.to_host("text/plain"), "#PID1#text/plain");
    }

    #[test]
    fn strips_client_ward() {
        let ns = MimeNamespace::with_prefix("#PID1#");
        assert_eq!(ns.to_clients("#PID1#text/plain"), Some("text/plain"));
    }

    #[test]
    fn drops_foreign_namespace() {
        let ns = MimeNamespace::with_prefix("#PID1#");
        assert_eq!(ns.to_clients("#other#text/plain"), None);
        assert_eq!(ns.to_clients("text/plain"), None);
    }

    #[test]
    fn empty_prefix_disables_namespacing() {
        let ns = MimeNamespace::new(Some(String::new()));
        assert_eq!(ns.to_host("text/plain"), "text/plain");
        assert_eq!(ns.to_clients("text/plain"), Some("text/plain"));
    }

    #[test]
    fn default_prefix_names_the_process() {
        let ns = MimeNamespace::new(None);
        assert_eq!(ns.prefix(), &format!("#PID{}#", std::process::id()));
    }

    proptest! {
        #[test]
        fn round_trips(mime in "[a-z]{1,12}/[a-z.+-]{1,16}") {
            let ns = MimeNamespace::with_prefix("#PID42#");
            prop_assert_eq!(ns.to_clients(&ns.to_host(&mime)), Some(mime.as_str()));
        }

        #[test]
        fn never_leaks_prefix(mime in "\\PC{0,24}") {
            let ns = MimeNamespace::with_prefix("#PID42#");
            if let Some(stripped) = ns.to_clients(&mime) {
                prop_assert!(!stripped.starts_with(ns.prefix()) || mime.starts_with("#PID42##PID42#"));
                prop_assert!(ns.to_host(stripped).starts_with(ns.prefix()));
            }
        }
    }
}
