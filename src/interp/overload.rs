//! Argument arrangement and overload scoring.
//!
//! The same algorithm serves function calls, struct literals and union
//! case literals: named and positional arguments are arranged against an
//! expected parameter list, each candidate gets a calling cost, and the
//! unique minimum wins. Rejected candidates keep the reason they were
//! excluded so the final diagnostic can list them.

use crate::interp::ty::{TypeId, TypeKind, TypeInterner};

/// One expected parameter.
#[derive(Clone, Debug)]
pub struct ExpectedParam {
    pub name: String,
    pub ty: TypeId,
    pub has_default: bool,
}

/// One supplied argument, already typechecked.
#[derive(Clone, Debug)]
pub struct SuppliedArg {
    pub name: Option<String>,
    pub ty: TypeId,
    /// `...expr`: an array spread into a variadic slot.
    pub spread: bool,
}

/// How a parameter slot gets its value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    /// From the argument at this index.
    Argument(usize),
    /// From the parameter's default expression.
    Default,
    /// The variadic tail: these argument indices are packed into the
    /// array (a spread argument passes through unpacked).
    Variadic(Vec<usize>),
}

/// A successful arrangement: one binding per parameter, plus its cost.
#[derive(Clone, Debug)]
pub struct Arrangement {
    pub bindings: Vec<Binding>,
    pub cost: u32,
}

// Cost constants from the resolution rules.
const COST_EXACT: u32 = 0;
const COST_CONVERSION: u32 = 1;
const COST_ANY: u32 = 5;

/// The cost of passing `from` where `to` is expected, or `None` when no
/// implicit conversion exists.
///
/// The closed conversion set: identity; T→any; nullptr→pointer;
/// `mut *T`→`*T`; int→float; T→?T; nullptr→?T; transitively anything
/// convertible-to-element into ?T; enum→its element type; and the
/// `array<void>` relaxations used by variadic spread.
pub fn conversion_cost(types: &TypeInterner, from: TypeId, to: TypeId) -> Option<u32> {
    if from == to {
        return Some(COST_EXACT);
    }

    if to == types.any() {
        return Some(COST_ANY);
    }

    match types.kind(to) {
        TypeKind::Pointer { elem, mutable } => match types.kind(from) {
            TypeKind::NullPtr => Some(COST_CONVERSION),
            TypeKind::Pointer {
                elem: from_elem,
                mutable: from_mutable,
            } if from_elem == elem && *from_mutable && !mutable => Some(COST_CONVERSION),
            // `*array<void>` accepts any array pointer.
            TypeKind::Pointer { elem: from_elem, .. }
                if is_void_array(types, *elem) && is_array(types, *from_elem) =>
            {
                Some(COST_CONVERSION)
            }
            _ => None,
        },
        TypeKind::Float if types.kind(from) == &TypeKind::Int => Some(COST_CONVERSION),
        TypeKind::Optional { elem } => match types.kind(from) {
            TypeKind::NullPtr => Some(COST_CONVERSION),
            _ => {
                // T→?T, and transitively anything convertible to T.
                let inner = conversion_cost(types, from, *elem)?;
                Some(inner.max(COST_CONVERSION))
            }
        },
        // array<void> accepts any array.
        TypeKind::Array { elem, .. }
            if *elem == types.void() && is_array(types, from) =>
        {
            Some(COST_CONVERSION)
        }
        _ => match types.kind(from) {
            // An enum converts to its element type.
            TypeKind::Enum { elem, .. } if *elem == to => Some(COST_CONVERSION),
            _ => None,
        },
    }
}

fn is_array(types: &TypeInterner, id: TypeId) -> bool {
    matches!(types.kind(id), TypeKind::Array { .. })
}

fn is_void_array(types: &TypeInterner, id: TypeId) -> bool {
    matches!(types.kind(id), TypeKind::Array { elem, .. } if *elem == types.void())
}

/// Arranges `args` against `params` and computes the calling cost.
///
/// The last parameter may be a variadic array, which absorbs the
/// positional tail. Returns a human-readable rejection reason on failure,
/// which the caller attaches to its candidate listing.
pub fn arrange_and_cost(
    types: &TypeInterner,
    params: &[ExpectedParam],
    variadic_last: bool,
    args: &[SuppliedArg],
) -> Result<Arrangement, String> {
    let positional_param_count = if variadic_last {
        params.len() - 1
    } else {
        params.len()
    };

    let mut bindings: Vec<Option<Binding>> = vec![None; params.len()];
    let mut variadic_args: Vec<usize> = Vec::new();
    let mut seen_named = false;

    for (arg_index, arg) in args.iter().enumerate() {
        match &arg.name {
            Some(name) => {
                seen_named = true;
                let param_index = params
                    .iter()
                    .position(|p| &p.name == name)
                    .ok_or_else(|| format!("no parameter named '{}'", name))?;
                if bindings[param_index].is_some() {
                    return Err(format!("parameter '{}' bound more than once", name));
                }
                bindings[param_index] = Some(Binding::Argument(arg_index));
            }
            None => {
                if seen_named {
                    return Err("positional argument after named argument".to_string());
                }

                // Find the first unbound positional slot.
                let slot = bindings[..positional_param_count]
                    .iter()
                    .position(Option::is_none);
                match slot {
                    Some(param_index) if !(variadic_last && param_index >= positional_param_count) => {
                        bindings[param_index] = Some(Binding::Argument(arg_index));
                    }
                    _ if variadic_last => variadic_args.push(arg_index),
                    _ => return Err("too many arguments".to_string()),
                }
            }
        }
    }

    let mut cost = 0u32;
    for (param_index, param) in params.iter().enumerate() {
        let is_variadic_slot = variadic_last && param_index == params.len() - 1;
        if is_variadic_slot {
            // Each packed element costs one, lumped under the slot; a
            // spread of an already-array value passes through.
            let elem_ty = types.array_element(param.ty).unwrap_or(param.ty);
            for &arg_index in &variadic_args {
                let arg = &args[arg_index];
                if arg.spread {
                    if conversion_cost(types, arg.ty, param.ty).is_none() {
                        return Err(format!(
                            "cannot spread '{}' into '{}'",
                            types.display(arg.ty),
                            types.display(param.ty)
                        ));
                    }
                    cost += COST_CONVERSION;
                } else {
                    match conversion_cost(types, arg.ty, elem_ty) {
                        Some(_) => cost += COST_CONVERSION,
                        None => {
                            return Err(format!(
                                "cannot convert '{}' to element type '{}'",
                                types.display(arg.ty),
                                types.display(elem_ty)
                            ))
                        }
                    }
                }
            }
            bindings[param_index] = Some(Binding::Variadic(core::mem::take(&mut variadic_args)));
            continue;
        }

        match &bindings[param_index] {
            Some(Binding::Argument(arg_index)) => {
                let arg = &args[*arg_index];
                match conversion_cost(types, arg.ty, param.ty) {
                    Some(c) => cost += c,
                    None => {
                        return Err(format!(
                            "cannot convert argument of type '{}' to '{}' for parameter '{}'",
                            types.display(arg.ty),
                            types.display(param.ty),
                            param.name
                        ))
                    }
                }
            }
            None if param.has_default => bindings[param_index] = Some(Binding::Default),
            None => return Err(format!("missing required argument '{}'", param.name)),
            _ => {}
        }
    }

    Ok(Arrangement {
        bindings: bindings.into_iter().map(Option::unwrap).collect(),
        cost,
    })
}

/// The outcome of scoring a whole candidate set.
pub enum ResolvedOverload {
    /// A unique best candidate.
    Unique(usize, Arrangement),
    /// Several candidates tie at the minimum cost.
    Ambiguous(Vec<usize>),
    /// Everything was rejected; per-candidate reasons, in order.
    NoMatch(Vec<String>),
}

/// Scores every candidate and picks the unique minimum.
pub fn pick_candidate(
    types: &TypeInterner,
    candidates: &[(Vec<ExpectedParam>, bool)],
    args: &[SuppliedArg],
) -> ResolvedOverload {
    let mut outcomes: Vec<Result<Arrangement, String>> = Vec::with_capacity(candidates.len());
    for (params, variadic) in candidates {
        outcomes.push(arrange_and_cost(types, params, *variadic, args));
    }

    let best = outcomes
        .iter()
        .filter_map(|o| o.as_ref().ok())
        .map(|a| a.cost)
        .min();

    match best {
        Some(best_cost) => {
            let winners: Vec<usize> = outcomes
                .iter()
                .enumerate()
                .filter(|(_, o)| matches!(o, Ok(a) if a.cost == best_cost))
                .map(|(i, _)| i)
                .collect();
            if winners.len() == 1 {
                let index = winners[0];
                let arrangement = outcomes.swap_remove(index).unwrap();
                ResolvedOverload::Unique(index, arrangement)
            } else {
                ResolvedOverload::Ambiguous(winners)
            }
        }
        None => ResolvedOverload::NoMatch(
            outcomes
                .into_iter()
                .map(|o| o.err().unwrap_or_default())
                .collect(),
        ),
    }
}

/// A partially-resolved overload set for candidates taking type
/// arguments: which candidates accept the supplied type arguments, and
/// why the others were excluded. Instantiation picks the winner later.
#[derive(Debug, Default)]
pub struct PartialOverloadSet {
    pub accepted: Vec<usize>,
    pub excluded: Vec<(usize, String)>,
}

impl PartialOverloadSet {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::ty::TypeInterner;

    fn param(name: &str, ty: TypeId) -> ExpectedParam {
        ExpectedParam {
            name: name.to_string(),
            ty,
            has_default: false,
        }
    }

    fn arg(ty: TypeId) -> SuppliedArg {
        SuppliedArg {
            name: None,
            ty,
            spread: false,
        }
    }

    #[test]
    fn exact_beats_conversion() {
        let types = TypeInterner::new();
        let int_candidate = (vec![param("x", types.int())], false);
        let float_candidate = (vec![param("x", types.float())], false);

        match pick_candidate(
            &types,
            &[int_candidate.clone(), float_candidate.clone()],
            &[arg(types.int())],
        ) {
            ResolvedOverload::Unique(0, a) => assert_eq!(a.cost, 0),
            other => panic!("wrong outcome: {:?}", discriminant_name(&other)),
        }

        // A float argument only fits the float overload.
        match pick_candidate(
            &types,
            &[int_candidate, float_candidate],
            &[arg(types.float())],
        ) {
            ResolvedOverload::Unique(1, _) => {}
            other => panic!("wrong outcome: {:?}", discriminant_name(&other)),
        }
    }

    #[test]
    fn any_costs_more_than_conversion() {
        let types = TypeInterner::new();
        let any_candidate = (vec![param("x", types.any())], false);
        let float_candidate = (vec![param("x", types.float())], false);

        // int -> float costs 1, int -> any costs 5.
        match pick_candidate(
            &types,
            &[any_candidate, float_candidate],
            &[arg(types.int())],
        ) {
            ResolvedOverload::Unique(1, a) => assert_eq!(a.cost, 1),
            other => panic!("wrong outcome: {:?}", discriminant_name(&other)),
        }
    }

    #[test]
    fn ambiguity_is_reported() {
        let types = TypeInterner::new();
        let a = (vec![param("x", types.int())], false);
        let b = (vec![param("x", types.int())], false);
        match pick_candidate(&types, &[a, b], &[arg(types.int())]) {
            ResolvedOverload::Ambiguous(winners) => assert_eq!(winners, [0, 1]),
            other => panic!("wrong outcome: {:?}", discriminant_name(&other)),
        }
    }

    #[test]
    fn no_match_lists_reasons() {
        let types = TypeInterner::new();
        let a = (vec![param("x", types.bool_())], false);
        match pick_candidate(&types, &[a], &[arg(types.int())]) {
            ResolvedOverload::NoMatch(reasons) => {
                assert_eq!(reasons.len(), 1);
                assert!(reasons[0].contains("cannot convert"));
            }
            other => panic!("wrong outcome: {:?}", discriminant_name(&other)),
        }
    }

    #[test]
    fn named_arguments() {
        let types = TypeInterner::new();
        let params = vec![param("a", types.int()), param("b", types.int())];
        let args = [
            SuppliedArg {
                name: Some("b".to_string()),
                ty: types.int(),
                spread: false,
            },
            SuppliedArg {
                name: Some("a".to_string()),
                ty: types.int(),
                spread: false,
            },
        ];
        let arrangement = arrange_and_cost(&types, &params, false, &args).unwrap();
        assert_eq!(arrangement.bindings[0], Binding::Argument(1));
        assert_eq!(arrangement.bindings[1], Binding::Argument(0));
    }

    #[test]
    fn positional_after_named_rejects() {
        let types = TypeInterner::new();
        let params = vec![param("a", types.int()), param("b", types.int())];
        let args = [
            SuppliedArg {
                name: Some("a".to_string()),
                ty: types.int(),
                spread: false,
            },
            arg(types.int()),
        ];
        assert!(arrange_and_cost(&types, &params, false, &args)
            .unwrap_err()
            .contains("positional argument after named"));
    }

    #[test]
    fn variadic_tail_and_defaults() {
        let mut types = TypeInterner::new();
        let variadic_ty = types.array(types.int(), true);
        let params = vec![
            param("first", types.int()),
            ExpectedParam {
                name: "rest".to_string(),
                ty: variadic_ty,
                has_default: false,
            },
        ];

        let args = [arg(types.int()), arg(types.int()), arg(types.int())];
        let arrangement = arrange_and_cost(&types, &params, true, &args).unwrap();
        assert_eq!(arrangement.bindings[0], Binding::Argument(0));
        assert_eq!(arrangement.bindings[1], Binding::Variadic(vec![1, 2]));
        // One per packed element.
        assert_eq!(arrangement.cost, 2);
    }

    #[test]
    fn missing_required_rejects() {
        let types = TypeInterner::new();
        let params = vec![param("a", types.int())];
        assert!(arrange_and_cost(&types, &params, false, &[])
            .unwrap_err()
            .contains("missing required argument"));
    }

    #[test]
    fn conversion_table() {
        let mut types = TypeInterner::new();
        let opt_int = types.optional(types.int());
        let ptr = types.pointer(types.int(), false);
        let mut_ptr = types.pointer(types.int(), true);
        let an_enum = types.declare_enum("E", types.int());

        assert_eq!(conversion_cost(&types, types.int(), types.int()), Some(0));
        assert_eq!(conversion_cost(&types, types.int(), types.float()), Some(1));
        assert_eq!(conversion_cost(&types, types.int(), types.any()), Some(5));
        assert_eq!(conversion_cost(&types, types.nullptr(), ptr), Some(1));
        assert_eq!(conversion_cost(&types, mut_ptr, ptr), Some(1));
        assert_eq!(conversion_cost(&types, ptr, mut_ptr), None);
        assert_eq!(conversion_cost(&types, types.int(), opt_int), Some(1));
        assert_eq!(conversion_cost(&types, types.nullptr(), opt_int), Some(1));
        assert_eq!(conversion_cost(&types, an_enum, types.int()), Some(1));
        assert_eq!(conversion_cost(&types, types.float(), types.int()), None);
    }

    fn discriminant_name(r: &ResolvedOverload) -> &'static str {
        match r {
            ResolvedOverload::Unique(..) => "Unique",
            ResolvedOverload::Ambiguous(..) => "Ambiguous",
            ResolvedOverload::NoMatch(..) => "NoMatch",
        }
    }
}
