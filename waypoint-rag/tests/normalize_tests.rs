//! Property tests for output normalization.

use proptest::prelude::*;
use waypoint_rag::normalize::normalize;

/// Text fragments biased towards the shapes model output actually takes:
/// section markers, list numbers, decimals and irregular whitespace.
fn arb_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("<greeting>".to_string()),
        Just("</greeting>".to_string()),
        Just("<recommendations>".to_string()),
        Just("</ Recommendations >".to_string()),
        Just("<conclusion>".to_string()),
        Just("</conclusion>".to_string()),
        Just("<gree".to_string()),
        Just("ting>".to_string()),
        Just("\n".to_string()),
        Just("\r\n".to_string()),
        Just("\n\n\n".to_string()),
        Just("  \t ".to_string()),
        "[0-9]{1,2}\\.[ \t]{0,3}".prop_map(String::from),
        "[0-9]\\.[0-9]".prop_map(String::from),
        "[A-Za-z,!]{1,10}".prop_map(String::from),
    ]
}

fn arb_response() -> impl Strategy<Value = String> {
    proptest::collection::vec(arb_fragment(), 0..40).prop_map(|parts| parts.concat())
}

mod prop_normalize {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(512))]

        #[test]
        fn idempotent_on_structured_input(raw in arb_response()) {
            let once = normalize(&raw);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn idempotent_on_arbitrary_input(raw in any::<String>()) {
            let once = normalize(&raw);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn output_has_no_markers_or_edge_whitespace(raw in arb_response()) {
            let out = normalize(&raw);
            let lower = out.to_lowercase();
            for name in ["greeting", "recommendations", "conclusion"] {
                let open = format!("<{}>", name);
                let close = format!("</{}>", name);
                prop_assert!(!lower.contains(&open), "opening marker left: {}", open);
                prop_assert!(!lower.contains(&close), "closing marker left: {}", close);
            }
            prop_assert_eq!(out.trim(), out.as_str());
            prop_assert!(!out.contains("\n\n\n"));
            prop_assert!(!out.contains("  "));
        }
    }
}

#[test]
fn scenario_three_response() {
    let raw = "<greeting>Hi</greeting>\n\n\n<recommendations>\n1.   Place A\n</recommendations>";
    let out = normalize(raw);
    assert_eq!(out, "Hi\n\n1. Place A");
    assert!(!out.contains('<') && !out.contains('>'));
}
