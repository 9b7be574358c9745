//! Header multimaps survive an encode/decode trip through host `Headers`.

use proptest::prelude::*;
use warpgrid_bridge::envelope::{canonical_name, split_values};
use warpgrid_bridge::HeaderMap;

fn name_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("accept"),
        Just("Cache-Control"),
        Just("x-trace-id"),
        Just("VARY"),
        Just("set-cookie"),
    ]
}

/// Values as they appear on the wire: bare tokens, or quoted strings that
/// may carry commas.
fn value_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9=;/.]{1,12}",
        "[a-z ,]{0,8}".prop_map(|inner| format!("\"{inner}\"")),
    ]
}

proptest! {
    /// Property: value count, value order per name and first-occurrence
    /// spelling all survive the round trip.
    #[test]
    fn host_round_trip_preserves_values(
        entries in prop::collection::vec((name_strategy(), value_strategy()), 0..12),
    ) {
        let mut map = HeaderMap::new();
        for (name, value) in &entries {
            map.insert(*name, value.clone());
        }

        let decoded = HeaderMap::from_host(&map.to_host().unwrap());

        prop_assert_eq!(decoded.len(), map.len());
        for (name, _) in &entries {
            prop_assert_eq!(decoded.get_all(name), map.get_all(name));
            let spelled = decoded.iter().find(|h| h.name.eq_ignore_ascii_case(name)).unwrap();
            prop_assert_eq!(&spelled.name, &canonical_name(name));
        }
    }

    /// Property: cookies are never split, whatever they contain.
    #[test]
    fn set_cookie_values_are_kept_whole(cookie in "[a-z]{1,6}=[a-z0-9]{1,6}; Expires=Wed, 21 Oct 2026 07:28:00 GMT") {
        prop_assert_eq!(split_values("Set-Cookie", &cookie), vec![cookie.clone()]);
    }
}

#[test]
fn unquoted_commas_split_and_quoted_commas_do_not() {
    assert_eq!(
        split_values("Accept", "text/html, application/json;q=0.9"),
        vec!["text/html", "application/json;q=0.9"]
    );
    assert_eq!(
        split_values("X-Note", r#""a, b", c"#),
        vec![r#""a, b""#, "c"]
    );
    assert_eq!(split_values("X-Empty", ""), vec![""]);
}

#[test]
fn multiple_cookies_round_trip_one_append_each() {
    let mut map = HeaderMap::new();
    map.insert("Set-Cookie", "a=1; Expires=Wed, 21 Oct 2026 07:28:00 GMT");
    map.insert("Set-Cookie", "b=2");

    let host = map.to_host().unwrap();
    assert_eq!(host.get_set_cookie().len(), 2);
    let decoded = HeaderMap::from_host(&host);
    assert_eq!(
        decoded.get_all("set-cookie"),
        vec!["a=1; Expires=Wed, 21 Oct 2026 07:28:00 GMT", "b=2"]
    );
}
