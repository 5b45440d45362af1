//! Adversarial rule catalog validation and the built-in default config.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/adversarial_config.py`'s
//! `AdversarialConfig.validate_integrity` and `get_default_config`. The
//! validation rules (unique ids, no dangling rule→category references, at
//! least one enabled category) are carried unchanged.

use std::collections::{BTreeSet, HashSet};

use crate::error::{Error, Result};
use crate::models::{AdversarialCategory, AdversarialConfig, AdversarialRule, ADVERSARIAL_CONFIG_CURRENT_VERSION};

fn is_snake_case_alnum(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Mirrors `AdversarialConfig.validate_integrity` exactly: duplicate
/// category/rule ids, dangling rule→category references, a non-positive
/// weight, a malformed id, or zero enabled categories are all validation
/// failures.
pub fn validate_adversarial_config(config: &AdversarialConfig) -> Result<()> {
    let mut seen_category_ids = HashSet::new();
    for category in &config.categories {
        if !is_snake_case_alnum(&category.id) {
            return Err(Error::validation(format!(
                "category id must be snake_case alphanumeric: {:?}",
                category.id
            )));
        }
        if category.weight < 1 {
            return Err(Error::validation(format!("category {:?} weight must be >= 1", category.id)));
        }
        if !seen_category_ids.insert(category.id.as_str()) {
            return Err(Error::validation(format!("duplicate category id: {:?}", category.id)));
        }
    }

    let mut seen_rule_ids = HashSet::new();
    for rule in &config.rules {
        if !is_snake_case_alnum(&rule.rule_id) {
            return Err(Error::validation(format!(
                "rule id must be snake_case alphanumeric: {:?}",
                rule.rule_id
            )));
        }
        if !seen_rule_ids.insert(rule.rule_id.as_str()) {
            return Err(Error::validation(format!("duplicate rule id: {:?}", rule.rule_id)));
        }
    }

    let category_id_set: HashSet<&str> = config.categories.iter().map(|c| c.id.as_str()).collect();
    for rule in &config.rules {
        let dangling: Vec<&str> = rule
            .categories
            .iter()
            .map(String::as_str)
            .filter(|cat_id| !category_id_set.contains(cat_id))
            .collect();
        if !dangling.is_empty() {
            return Err(Error::validation(format!(
                "rule {:?} references non-existent categories: {:?}",
                rule.rule_id, dangling
            )));
        }
    }

    if !config.categories.iter().any(|c| c.enabled) {
        return Err(Error::validation("at least one category must be enabled"));
    }

    Ok(())
}

pub fn enabled_categories(config: &AdversarialConfig) -> Vec<&AdversarialCategory> {
    config.categories.iter().filter(|c| c.enabled).collect()
}

pub fn enabled_category_ids(config: &AdversarialConfig) -> Vec<&str> {
    config.categories.iter().filter(|c| c.enabled).map(|c| c.id.as_str()).collect()
}

pub fn rules_for_category<'a>(config: &'a AdversarialConfig, category_id: &str) -> Vec<&'a AdversarialRule> {
    config
        .rules
        .iter()
        .filter(|r| r.categories.iter().any(|c| c == category_id))
        .collect()
}

/// The fixed rule-id subset CorrectnessJudge checks, independent of the
/// adversarial category config (`rule_catalog.py`'s `_CORRECTNESS_RULE_IDS`).
pub const CORRECTNESS_RULE_IDS: &[&str] = &[
    "exact_calorie_values",
    "single_food_no_breakdown",
    "multi_food_per_item_tables",
    "action_chips_present",
    "composite_dish_single_item",
];

/// The fixed rule-id subset EfficiencyJudge checks (`_EFFICIENCY_RULE_IDS`).
pub const EFFICIENCY_RULE_IDS: &[&str] = &[
    "ask_time_if_missing",
    "ask_quantity_if_ambiguous",
    "apply_user_corrections",
    "meal_isolation",
    "no_assume_without_context",
    "support_post_confirmation_edit",
    "separate_multiple_meals",
];

pub fn rules_for_correctness(config: &AdversarialConfig) -> Vec<&AdversarialRule> {
    config.rules.iter().filter(|r| CORRECTNESS_RULE_IDS.contains(&r.rule_id.as_str())).collect()
}

pub fn rules_for_efficiency(config: &AdversarialConfig) -> Vec<&AdversarialRule> {
    config.rules.iter().filter(|r| EFFICIENCY_RULE_IDS.contains(&r.rule_id.as_str())).collect()
}

fn category(id: &str, label: &str, description: &str) -> AdversarialCategory {
    AdversarialCategory {
        id: id.to_string(),
        label: label.to_string(),
        description: description.to_string(),
        weight: 1,
        enabled: true,
    }
}

fn rule(rule_id: &str, section: &str, rule_text: &str, categories: &[&str]) -> AdversarialRule {
    AdversarialRule {
        rule_id: rule_id.to_string(),
        section: section.to_string(),
        rule_text: rule_text.to_string(),
        categories: categories.iter().map(|s| s.to_string()).collect(),
    }
}

/// The built-in 7-category, 13-rule default config, carried verbatim from
/// `get_default_config`.
pub fn default_config() -> AdversarialConfig {
    let categories = vec![
        category("quantity_ambiguity", "Quantity Ambiguity", "Inputs with unusual, informal, or ambiguous quantities."),
        category(
            "multi_meal_single_message",
            "Multi-Meal Single Message",
            "Multiple meals/times in a single message.",
        ),
        category(
            "correction_contradiction",
            "Correction / Contradiction",
            "Initial ambiguous meal description (agent corrects in later turn).",
        ),
        category(
            "edit_after_confirmation",
            "Edit After Confirmation",
            "Normal meal description (agent confirms then requests edit).",
        ),
        category("future_time_rejection", "Future Time Rejection", "User provides future time for meal."),
        category(
            "contextual_without_context",
            "Contextual Without Context",
            "ONLY quantity/time with no food mentioned.",
        ),
        category(
            "composite_dish",
            "Composite Dish",
            "Composite dish with multiple ingredients as ONE item.",
        ),
    ];

    let rules = vec![
        rule(
            "ask_time_if_missing",
            "Time Validation Instructions",
            "If the meal time is not specified, the system MUST ask the user for the exact time before generating a meal summary. It must never assume a time.",
            &[
                "quantity_ambiguity",
                "multi_meal_single_message",
                "correction_contradiction",
                "edit_after_confirmation",
                "composite_dish",
            ],
        ),
        rule(
            "reject_future_time",
            "Time Validation Instructions",
            "If the user mentions a FUTURE time (e.g. 'in 30 minutes', 'planning to eat at 5pm'), the system MUST NOT generate a meal summary or log the meal. It must ask for a valid past/present time.",
            &["future_time_rejection"],
        ),
        rule(
            "ask_quantity_if_ambiguous",
            "Food Processing Instructions",
            "If the quantity is ambiguous or missing, the system MUST ask the user for clarification before computing calories. It must never guess or assume a default quantity.",
            &["quantity_ambiguity", "contextual_without_context"],
        ),
        rule(
            "exact_calorie_values",
            "Nutrition Data Context",
            "The system MUST use the exact calorie values from the nutrition API. It must NOT round to the nearest 50 or 100. The exact values listed must appear in the meal summary.",
            &[
                "quantity_ambiguity",
                "multi_meal_single_message",
                "correction_contradiction",
                "edit_after_confirmation",
                "composite_dish",
            ],
        ),
        rule(
            "meal_isolation",
            "Meal Isolation Instructions",
            "The system MUST only use foods from the current meal entry. It must NOT include foods from previous meals or conversation history. Each meal is isolated.",
            &["multi_meal_single_message", "edit_after_confirmation"],
        ),
        rule(
            "apply_user_corrections",
            "Edit Operation Prompt Construction",
            "When the user corrects a quantity, food item, or time, the system MUST update the meal summary to reflect the correction and recalculate calories accordingly. It must never ignore a user correction.",
            &["correction_contradiction"],
        ),
        rule(
            "support_post_confirmation_edit",
            "Edit Operation Prompt Construction",
            "After a meal is confirmed/logged, the system MUST support editing the meal (change quantity, food, or time) if the user requests it. It should regenerate an updated summary.",
            &["edit_after_confirmation"],
        ),
        rule(
            "no_assume_without_context",
            "Contextual Message Instructions",
            "If the user sends only a quantity or time with no food mentioned (e.g. '200 grams', 'at 2pm'), the system MUST ask what food they are referring to. It must NOT assume or guess a food item.",
            &["contextual_without_context"],
        ),
        rule(
            "composite_dish_single_item",
            "Food Processing Instructions",
            "When the user describes a composite dish with ingredients (e.g. 'porridge with almonds and honey'), the system MUST treat it as ONE dish. It must NOT split ingredients into separate food items. It should only ask for the main dish quantity.",
            &["composite_dish"],
        ),
        rule(
            "single_food_no_breakdown",
            "Duplicate Table Prevention Instructions",
            "For a single food item, the system MUST show the summary nutrition table but MUST NOT show a 'Detailed Breakdown' section or duplicate table.",
            &["quantity_ambiguity", "composite_dish"],
        ),
        rule(
            "multi_food_per_item_tables",
            "Table Formatting Instructions",
            "For multiple food items, the system MUST show a summary table at the top and a detailed breakdown section with per-item nutrition tables for each food.",
            &["multi_meal_single_message"],
        ),
        rule(
            "action_chips_present",
            "Action Chips Instructions",
            "Every meal summary MUST include both action chips at the end: confirm_log and edit_meal in XML chip format. Plain-text buttons are forbidden.",
            &[
                "quantity_ambiguity",
                "multi_meal_single_message",
                "correction_contradiction",
                "edit_after_confirmation",
                "composite_dish",
            ],
        ),
        rule(
            "separate_multiple_meals",
            "Meal Isolation Instructions",
            "When the user describes multiple meals in a single message (e.g. breakfast and lunch), the system MUST isolate and process each meal separately. It must NOT merge them into one entry.",
            &["multi_meal_single_message"],
        ),
    ];

    AdversarialConfig {
        version: ADVERSARIAL_CONFIG_CURRENT_VERSION,
        categories,
        rules,
    }
}

/// Synthesizes full rule coverage for a judge's output: every rule the
/// catalog lists but the judge's `rule_compliance` omits gets
/// `followed=true, evidence="Not evaluated by judge"` (spec.md §4.5).
pub fn fill_missing_rule_coverage(
    catalog_rule_ids: &[String],
    judged: &mut Vec<crate::models::RuleCompliance>,
) {
    let judged_ids: BTreeSet<&str> = judged.iter().map(|r| r.rule_id.as_str()).collect();
    for rule_id in catalog_rule_ids {
        if !judged_ids.contains(rule_id.as_str()) {
            judged.push(crate::models::RuleCompliance {
                rule_id: rule_id.clone(),
                section: String::new(),
                followed: true,
                evidence: "Not evaluated by judge".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        let config = default_config();
        validate_adversarial_config(&config).expect("default config is valid");
        assert_eq!(config.categories.len(), 7);
        assert_eq!(config.rules.len(), 13);
    }

    #[test]
    fn dangling_rule_reference_is_rejected() {
        let mut config = default_config();
        config.rules[0].categories.push("not_a_real_category".to_string());
        let err = validate_adversarial_config(&config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationFailure);
    }

    #[test]
    fn duplicate_category_id_is_rejected() {
        let mut config = default_config();
        let dup = config.categories[0].clone();
        config.categories.push(dup);
        assert!(validate_adversarial_config(&config).is_err());
    }

    #[test]
    fn all_categories_disabled_is_rejected() {
        let mut config = default_config();
        for category in &mut config.categories {
            category.enabled = false;
        }
        assert!(validate_adversarial_config(&config).is_err());
    }

    #[test]
    fn missing_rule_coverage_is_synthesized() {
        let catalog_ids = vec!["a".to_string(), "b".to_string()];
        let mut judged = vec![crate::models::RuleCompliance {
            rule_id: "a".to_string(),
            section: "s".to_string(),
            followed: false,
            evidence: "observed violation".to_string(),
        }];
        fill_missing_rule_coverage(&catalog_ids, &mut judged);
        assert_eq!(judged.len(), 2);
        let synthesized = judged.iter().find(|r| r.rule_id == "b").expect("synthesized entry");
        assert!(synthesized.followed);
        assert_eq!(synthesized.evidence, "Not evaluated by judge");
    }
}
