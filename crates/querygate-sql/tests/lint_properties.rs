use proptest::prelude::*;
use querygate_sql::lint::{ERR_DDL_DML, ERR_NOT_SELECT, ERR_UNQUALIFIED, FORBIDDEN_KEYWORDS};
use querygate_sql::{enforce_limit, LintConfig, SqlValidator};

fn validator() -> SqlValidator {
    SqlValidator::new(LintConfig {
        allowed_schemas: vec!["public".into(), "analytics".into()],
        max_rows: 200,
        dialect: "postgres".into(),
    })
    .unwrap()
}

fn mixed_case(word: &str, mask: u32) -> String {
    word.chars()
        .enumerate()
        .map(|(i, c)| {
            if mask & (1 << (i % 32)) != 0 {
                c.to_ascii_lowercase()
            } else {
                c.to_ascii_uppercase()
            }
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_forbidden_keyword_anywhere_is_rejected(
        idx in 0..FORBIDDEN_KEYWORDS.len(),
        mask in any::<u32>(),
        position in 0usize..3,
    ) {
        let keyword = mixed_case(FORBIDDEN_KEYWORDS[idx], mask);
        let sql = match position {
            0 => format!("{keyword} TABLE public.orders"),
            1 => format!("SELECT id FROM public.orders /* {keyword} */ LIMIT 5"),
            _ => format!("WITH x AS (SELECT 1) SELECT * FROM public.t WHERE y IN ({keyword} z)"),
        };
        let result = validator().lint(&sql);
        prop_assert!(!result.ok);
        prop_assert!(result.errors[0].contains("DDL/DML"));
    }

    #[test]
    fn prop_non_select_prefix_is_rejected(prefix in "(SHOW|EXPLAIN|VALUES|TABLE|COPY|CALL)") {
        let result = validator().lint(&format!("{prefix} public.orders"));
        prop_assert!(!result.ok);
        prop_assert_eq!(result.errors[0].as_str(), ERR_NOT_SELECT);
    }

    #[test]
    fn prop_unqualified_text_is_rejected(table in "[a-z][a-z_]{0,10}") {
        let result = validator().lint(&format!("SELECT id FROM {table}"));
        prop_assert!(!result.ok);
        // Generated names may collide with a forbidden keyword.
        prop_assert!(
            result.errors[0] == ERR_UNQUALIFIED || result.errors[0].contains("DDL/DML")
        );
    }

    #[test]
    fn prop_allowed_schema_within_cap_is_accepted(
        schema in prop::sample::select(vec!["public", "analytics"]),
        table in "t_[a-z]{1,8}",
        limit in proptest::option::of(0u64..=200),
    ) {
        let mut sql = format!("SELECT id FROM {schema}.{table}");
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }
        let result = validator().lint(&sql);
        prop_assert!(result.ok, "{:?}", result.errors);
        prop_assert!(result.errors.is_empty());
    }

    #[test]
    fn prop_limit_over_cap_is_rejected(limit in 201u64..1_000_000) {
        let result = validator().lint(&format!("SELECT id FROM public.orders LIMIT {limit}"));
        prop_assert_eq!(result.errors, vec!["LIMIT exceeds 200".to_string()]);
    }
}

#[test]
fn test_disallowed_schema_in_join() {
    let result = validator().lint(
        "SELECT o.id FROM public.orders o JOIN finance.invoices i ON i.order_id = o.id LIMIT 10",
    );
    assert!(!result.ok);
    assert_eq!(result.errors, vec![r#"Unallowed schemas: ["finance"]"#.to_string()]);
}

proptest! {
    #[test]
    fn prop_qualified_function_outside_allow_list_is_rejected(
        schema in "(secret|pg_catalog|hr|x[a-z]{1,6})",
        function in "f_[a-z]{1,8}",
    ) {
        let sql = format!("SELECT {schema}.{function}(o.id) FROM public.orders o LIMIT 5");
        let result = validator().lint(&sql);
        prop_assert_eq!(result.errors, vec![format!("Unallowed schemas: [{schema:?}]")]);
    }

    #[test]
    fn prop_enforced_limit_bounds_outer_query(
        literal in "LIMIT [0-9]{1,4}",
        inner in 1u64..=200,
    ) {
        let sql = format!(
            "SELECT id FROM public.orders WHERE note = '{literal}' \
             AND customer_id IN (SELECT id FROM public.customers LIMIT {inner})"
        );
        let enforced = enforce_limit(&sql, 200);
        prop_assert!(enforced.ends_with("\nLIMIT 200"), "{}", enforced);
        prop_assert!(validator().lint(&enforced).ok);
    }
}

#[test]
fn test_allowed_qualified_function_passes() {
    let result = validator().lint("SELECT analytics.revenue(o.id) FROM public.orders o LIMIT 5");
    assert!(result.ok, "{:?}", result.errors);
}

#[test]
fn test_select_into_never_passes() {
    let result = validator()
        .lint("WITH t AS (SELECT id FROM public.orders) SELECT id INTO public.t_copy FROM t LIMIT 5");
    assert!(!result.ok);
    assert!(result.errors[0].starts_with(ERR_DDL_DML));
}
