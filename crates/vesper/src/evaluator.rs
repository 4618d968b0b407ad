//! Tree-walking evaluator.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{BinaryOp, ClassDeclDef, LambdaDef, Node};
use crate::env::{EnvRef, Environment};
use crate::error::{EvalResult, Flow, VesperError};
use crate::io::PrintWriter;
use crate::lexer::Literal;
use crate::value::{ClassObj, InstanceObj, RangeBound, RangeValue, Value, SUPER_INIT};

fn literal_to_value(lit: &Literal) -> Value {
    match lit {
        Literal::Nil => Value::Nil,
        Literal::Bool(b) => Value::Boolean(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::Str(s) => Value::new_string(s.clone()),
        Literal::Char(c) => Value::Char(*c),
    }
}

fn arity_err(name: &str, expected: &str, got: usize) -> Flow {
    Flow::from(VesperError::Arity(format!("'{name}' expects {expected} argument(s), got {got}")))
}

/// Evaluates a single AST node against `env`, sending any `print` output to
/// `print`. This is the entry point used for every statement and every
/// sub-expression alike: every node produces a `Value`.
pub fn eval_node<P: PrintWriter>(node: &Node, env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    match node {
        Node::Literal(lit) => Ok(literal_to_value(lit)),
        Node::Identifier(name) => Ok(Environment::get(env, name)?),
        Node::Block(stmts) => eval_block(stmts, env, print),
        Node::ListExpr(elems) => {
            let mut values = Vec::with_capacity(elems.len());
            for e in elems {
                values.push(eval_node(e, env, print)?);
            }
            Ok(Value::new_list(values))
        }
        Node::Not(inner) => {
            let v = eval_node(inner, env, print)?;
            match v {
                Value::Boolean(b) => Ok(Value::Boolean(!b)),
                other => Err(Flow::from(VesperError::Type(format!(
                    "'!' requires a boolean operand, got a {}",
                    other.type_name()
                )))),
            }
        }
        Node::Negate(inner) => {
            let v = eval_node(inner, env, print)?;
            match v {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(Flow::from(VesperError::Type(format!(
                    "unary '-' requires a number operand, got a {}",
                    other.type_name()
                )))),
            }
        }
        Node::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, env, print),
        Node::Range { inclusive, lhs, rhs } => eval_range(*inclusive, lhs, rhs, env, print),
        Node::BoundMethod { .. } => Err(Flow::from(VesperError::Internal(
            "'BoundMethod' evaluated outside an invocation".into(),
        ))),
        Node::MemberRef { instance, member_name } => eval_member_ref(instance, member_name, env, print),
        Node::VarDecl(name) => {
            Environment::declare_var(env, name, Value::Nil)?;
            Ok(Value::Nil)
        }
        Node::VarInit(name, init) => {
            let v = eval_node(init, env, print)?;
            Environment::declare_var(env, name, v.clone())?;
            Ok(v)
        }
        Node::ConstInit(name, init) => {
            let v = eval_node(init, env, print)?;
            Environment::declare_const(env, name, v.clone())?;
            Ok(v)
        }
        Node::Assign(name, expr) => {
            let v = eval_node(expr, env, print)?;
            Environment::assign(env, name, v.clone())?;
            Ok(v)
        }
        Node::SubscriptAssign { list, index, expr } => eval_subscript_assign(list, index, expr, env, print),
        Node::MemberAssign { instance, member, expr } => eval_member_assign(instance, member, expr, env, print),
        Node::If { cond, then_block, else_branch } => {
            eval_if(cond, then_block, else_branch.as_deref(), env, print)
        }
        Node::While { cond, body } => eval_while(cond, body, env, print),
        Node::For {
            iter_name,
            counter_name,
            iterable,
            body,
        } => eval_for(iter_name, counter_name.as_ref(), iterable, body, env, print),
        Node::Break => Err(Flow::Break),
        Node::Continue => Err(Flow::Continue),
        Node::Return(expr) => {
            let v = match expr {
                Some(e) => eval_node(e, env, print)?,
                None => Value::Nil,
            };
            Err(Flow::Return(v))
        }
        Node::Print(expr) => {
            let v = eval_node(expr, env, print)?;
            print.print(&v.display_string());
            Ok(Value::Nil)
        }
        Node::Lambda(lambda) => Ok(Value::Lambda(lambda.clone())),
        Node::ClassDecl(def) => eval_class_decl(def, env),
        Node::SuperCall(args) => eval_super_call(args, env, print),
    }
}

fn eval_stmts_in_scope<P: PrintWriter>(stmts: &[Node], scope: &EnvRef, print: &mut P) -> EvalResult<Value> {
    let mut result = Value::Nil;
    for stmt in stmts {
        result = eval_node(stmt, scope, print)?;
    }
    Ok(result)
}

fn eval_block<P: PrintWriter>(stmts: &[Node], env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    let scope = Environment::new_child(env);
    eval_stmts_in_scope(stmts, &scope, print)
}

fn eval_args<P: PrintWriter>(nodes: &[Node], env: &EnvRef, print: &mut P) -> EvalResult<Vec<Value>> {
    let mut values = Vec::with_capacity(nodes.len());
    for n in nodes {
        values.push(eval_node(n, env, print)?);
    }
    Ok(values)
}

fn eval_binary<P: PrintWriter>(op: BinaryOp, lhs: &Node, rhs: &Node, env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    match op {
        BinaryOp::Invocation => eval_invocation(lhs, rhs, env, print),
        BinaryOp::Subscript => eval_subscript(lhs, rhs, env, print),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let l = eval_node(lhs, env, print)?;
            let r = eval_node(rhs, env, print)?;
            let (Value::Number(a), Value::Number(b)) = (&l, &r) else {
                return Err(Flow::from(VesperError::Type(format!(
                    "arithmetic requires number operands, got {} and {}",
                    l.type_name(),
                    r.type_name()
                ))));
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => unreachable!(),
            };
            Ok(Value::Number(result))
        }
        BinaryOp::Eq => {
            let l = eval_node(lhs, env, print)?;
            let r = eval_node(rhs, env, print)?;
            Ok(Value::Boolean(l.values_equal(&r)))
        }
        BinaryOp::Or => {
            let l = eval_node(lhs, env, print)?;
            let Value::Boolean(lb) = l else {
                return Err(Flow::from(VesperError::Type(format!(
                    "'or' requires a boolean operand, got a {}",
                    l.type_name()
                ))));
            };
            if lb {
                return Ok(Value::Boolean(true));
            }
            let r = eval_node(rhs, env, print)?;
            let Value::Boolean(rb) = r else {
                return Err(Flow::from(VesperError::Type(format!(
                    "'or' requires a boolean operand, got a {}",
                    r.type_name()
                ))));
            };
            Ok(Value::Boolean(rb))
        }
        BinaryOp::And => {
            let l = eval_node(lhs, env, print)?;
            let Value::Boolean(lb) = l else {
                return Err(Flow::from(VesperError::Type(format!(
                    "'and' requires a boolean operand, got a {}",
                    l.type_name()
                ))));
            };
            if !lb {
                return Ok(Value::Boolean(false));
            }
            let r = eval_node(rhs, env, print)?;
            let Value::Boolean(rb) = r else {
                return Err(Flow::from(VesperError::Type(format!(
                    "'and' requires a boolean operand, got a {}",
                    r.type_name()
                ))));
            };
            Ok(Value::Boolean(rb))
        }
        BinaryOp::Lt | BinaryOp::Gt => {
            let l = eval_node(lhs, env, print)?;
            let r = eval_node(rhs, env, print)?;
            let (Value::Number(a), Value::Number(b)) = (&l, &r) else {
                return Err(Flow::from(VesperError::Type(format!(
                    "comparison requires number operands, got {} and {}",
                    l.type_name(),
                    r.type_name()
                ))));
            };
            let result = if op == BinaryOp::Lt { a < b } else { a > b };
            Ok(Value::Boolean(result))
        }
    }
}

fn eval_range<P: PrintWriter>(inclusive: bool, lhs: &Node, rhs: &Node, env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    let l = eval_node(lhs, env, print)?;
    let r = eval_node(rhs, env, print)?;
    let (start, end) = match (&l, &r) {
        (Value::Number(a), Value::Number(b)) => (RangeBound::Number(*a), RangeBound::Number(*b)),
        (Value::Char(a), Value::Char(b)) => (RangeBound::Char(*a), RangeBound::Char(*b)),
        _ => {
            return Err(Flow::from(VesperError::Type(
                "range bounds must both be numbers or both be chars".into(),
            )))
        }
    };
    Ok(Value::Range(Rc::new(RangeValue { start, end, inclusive })))
}

fn eval_subscript<P: PrintWriter>(lhs: &Node, rhs: &Node, env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    let lhs_val = eval_node(lhs, env, print)?;
    let Value::List(list_rc) = &lhs_val else {
        return Err(Flow::from(VesperError::Type(format!(
            "cannot subscript a {}",
            lhs_val.type_name()
        ))));
    };
    let idx_val = eval_node(rhs, env, print)?;
    let Value::Number(idx_f) = idx_val else {
        return Err(Flow::from(VesperError::Type("subscript index must be a number".into())));
    };
    let list = list_rc.borrow();
    let idx = idx_f as i64;
    if idx < 0 || idx as usize >= list.len() {
        return Err(Flow::from(VesperError::Index(format!(
            "index {idx} out of range for list of length {}",
            list.len()
        ))));
    }
    Ok(list[idx as usize].clone())
}

fn eval_subscript_assign<P: PrintWriter>(
    list: &Node,
    index: &Node,
    expr: &Node,
    env: &EnvRef,
    print: &mut P,
) -> EvalResult<Value> {
    let list_val = eval_node(list, env, print)?;
    let Value::List(list_rc) = &list_val else {
        return Err(Flow::from(VesperError::Type(format!(
            "cannot index-assign into a {}",
            list_val.type_name()
        ))));
    };
    let idx_val = eval_node(index, env, print)?;
    let Value::Number(idx_f) = idx_val else {
        return Err(Flow::from(VesperError::Type("list index must be a number".into())));
    };
    let value = eval_node(expr, env, print)?;
    let mut list = list_rc.borrow_mut();
    let idx = idx_f as i64;
    if idx < 0 || idx as usize >= list.len() {
        return Err(Flow::from(VesperError::Index(format!(
            "index {idx} out of range for list of length {}",
            list.len()
        ))));
    }
    list[idx as usize] = value.clone();
    Ok(value)
}

fn eval_member_ref<P: PrintWriter>(instance: &Node, member_name: &str, env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    let val = eval_node(instance, env, print)?;
    match &val {
        Value::Instance(inst_rc) => inst_rc.borrow().fields.get(member_name).cloned().ok_or_else(|| {
            let class_name = inst_rc.borrow().class.borrow().name.clone();
            Flow::from(VesperError::Name(format!("instance of '{class_name}' has no field '{member_name}'")))
        }),
        Value::Str(s) => {
            if member_name == "length" {
                Ok(Value::Number(s.borrow().chars().count() as f32))
            } else {
                Err(Flow::from(VesperError::Name(format!("string has no member '{member_name}'"))))
            }
        }
        Value::List(l) => match member_name {
            "length" => Ok(Value::Number(l.borrow().len() as f32)),
            "capacity" => Ok(Value::Number(l.borrow().capacity() as f32)),
            _ => Err(Flow::from(VesperError::Name(format!("list has no member '{member_name}'")))),
        },
        other => Err(Flow::from(VesperError::Type(format!(
            "cannot access member '{member_name}' on a {}",
            other.type_name()
        )))),
    }
}

fn eval_member_assign<P: PrintWriter>(
    instance: &Node,
    member: &str,
    expr: &Node,
    env: &EnvRef,
    print: &mut P,
) -> EvalResult<Value> {
    let inst_val = eval_node(instance, env, print)?;
    let Value::Instance(inst_rc) = &inst_val else {
        return Err(Flow::from(VesperError::Type(format!(
            "cannot assign member '{member}' on a {}",
            inst_val.type_name()
        ))));
    };
    let value = eval_node(expr, env, print)?;
    inst_rc.borrow_mut().fields.insert(member.to_string(), value.clone());
    Ok(value)
}

fn eval_if<P: PrintWriter>(
    cond: &Node,
    then_block: &Node,
    else_branch: Option<&Node>,
    env: &EnvRef,
    print: &mut P,
) -> EvalResult<Value> {
    let cond_val = eval_node(cond, env, print)?;
    let Value::Boolean(b) = cond_val else {
        return Err(Flow::from(VesperError::Type("if condition must be boolean".into())));
    };
    if b {
        eval_node(then_block, env, print)?;
    } else if let Some(else_node) = else_branch {
        eval_node(else_node, env, print)?;
    }
    Ok(Value::Nil)
}

fn eval_while<P: PrintWriter>(cond: &Node, body: &Node, env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    let Node::Block(stmts) = body else {
        return Err(Flow::from(VesperError::Internal("while body is not a block".into())));
    };
    loop {
        let cond_val = eval_node(cond, env, print)?;
        let Value::Boolean(b) = cond_val else {
            return Err(Flow::from(VesperError::Type("while condition must be boolean".into())));
        };
        if !b {
            break;
        }
        let scope = Environment::new_child(env);
        match eval_stmts_in_scope(stmts, &scope, print) {
            Ok(_) => {}
            Err(Flow::Break) => break,
            Err(Flow::Continue) => continue,
            Err(other) => return Err(other),
        }
    }
    Ok(Value::Nil)
}

fn eval_for<P: PrintWriter>(
    iter_name: &str,
    counter_name: Option<&String>,
    iterable: &Node,
    body: &Node,
    env: &EnvRef,
    print: &mut P,
) -> EvalResult<Value> {
    let Node::Block(stmts) = body else {
        return Err(Flow::from(VesperError::Internal("for body is not a block".into())));
    };
    let iterable_val = eval_node(iterable, env, print)?;
    match iterable_val {
        Value::List(list_rc) => {
            let len = list_rc.borrow().len();
            for idx in 0..len {
                let Some(item) = list_rc.borrow().get(idx).cloned() else {
                    break;
                };
                let scope = Environment::new_child(env);
                Environment::declare_var(&scope, iter_name, item)?;
                if let Some(counter) = counter_name {
                    Environment::declare_var(&scope, counter, Value::Number(idx as f32))?;
                }
                let flow = eval_stmts_in_scope(stmts, &scope, print);
                let final_val = Environment::get(&scope, iter_name).unwrap_or(Value::Nil);
                let mut list = list_rc.borrow_mut();
                if idx < list.len() {
                    list[idx] = final_val;
                }
                drop(list);
                match flow {
                    Ok(_) => {}
                    Err(Flow::Break) => break,
                    Err(Flow::Continue) => continue,
                    Err(other) => return Err(other),
                }
            }
        }
        Value::Str(str_rc) => {
            let mut chars: Vec<char> = str_rc.borrow().chars().collect();
            let len = chars.len();
            for idx in 0..len {
                let scope = Environment::new_child(env);
                Environment::declare_var(&scope, iter_name, Value::Char(chars[idx]))?;
                if let Some(counter) = counter_name {
                    Environment::declare_var(&scope, counter, Value::Number(idx as f32))?;
                }
                let flow = eval_stmts_in_scope(stmts, &scope, print);
                let final_val = Environment::get(&scope, iter_name).unwrap_or(Value::Char(chars[idx]));
                match final_val {
                    Value::Char(c) => chars[idx] = c,
                    _ => {
                        *str_rc.borrow_mut() = chars.iter().collect();
                        return Err(Flow::from(VesperError::Type(
                            "for over a string requires 'iter' to remain a char".into(),
                        )));
                    }
                }
                match flow {
                    Ok(_) => {}
                    Err(Flow::Break) => {
                        *str_rc.borrow_mut() = chars.iter().collect();
                        break;
                    }
                    Err(Flow::Continue) => continue,
                    Err(other) => {
                        *str_rc.borrow_mut() = chars.iter().collect();
                        return Err(other);
                    }
                }
            }
            *str_rc.borrow_mut() = chars.iter().collect();
        }
        Value::Range(range_rc) => eval_for_range(&range_rc, iter_name, counter_name, stmts, env, print)?,
        other => {
            return Err(Flow::from(VesperError::Type(format!(
                "cannot iterate over a {}",
                other.type_name()
            ))))
        }
    }
    Ok(Value::Nil)
}

fn eval_for_range<P: PrintWriter>(
    range: &RangeValue,
    iter_name: &str,
    counter_name: Option<&String>,
    stmts: &[Node],
    env: &EnvRef,
    print: &mut P,
) -> EvalResult<()> {
    match (range.start, range.end) {
        (RangeBound::Number(start), RangeBound::Number(end)) => {
            let mut current = start;
            let mut idx: usize = 0;
            loop {
                let keep_going = if range.inclusive { current <= end } else { current < end };
                if !keep_going {
                    break;
                }
                let scope = Environment::new_child(env);
                Environment::declare_var(&scope, iter_name, Value::Number(current))?;
                if let Some(counter) = counter_name {
                    Environment::declare_var(&scope, counter, Value::Number(idx as f32))?;
                }
                match eval_stmts_in_scope(stmts, &scope, print) {
                    Ok(_) => {}
                    Err(Flow::Break) => break,
                    Err(Flow::Continue) => {
                        current += 1.0;
                        idx += 1;
                        continue;
                    }
                    Err(other) => return Err(other),
                }
                current += 1.0;
                idx += 1;
            }
        }
        (RangeBound::Char(start), RangeBound::Char(end)) => {
            let mut current = start as u32;
            let end_code = end as u32;
            let mut idx: usize = 0;
            loop {
                let keep_going = if range.inclusive { current <= end_code } else { current < end_code };
                let Some(ch) = (if keep_going { char::from_u32(current) } else { None }) else {
                    break;
                };
                let scope = Environment::new_child(env);
                Environment::declare_var(&scope, iter_name, Value::Char(ch))?;
                if let Some(counter) = counter_name {
                    Environment::declare_var(&scope, counter, Value::Number(idx as f32))?;
                }
                match eval_stmts_in_scope(stmts, &scope, print) {
                    Ok(_) => {}
                    Err(Flow::Break) => break,
                    Err(Flow::Continue) => {
                        current += 1;
                        idx += 1;
                        continue;
                    }
                    Err(other) => return Err(other),
                }
                current += 1;
                idx += 1;
            }
        }
        _ => return Err(Flow::from(VesperError::Internal("range with mismatched bound kinds".into()))),
    }
    Ok(())
}

fn eval_invocation<P: PrintWriter>(lhs: &Node, rhs: &Node, env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    let Node::Block(arg_nodes) = rhs else {
        return Err(Flow::from(VesperError::Internal(
            "invocation arguments are not a Block".into(),
        )));
    };
    match lhs {
        Node::BoundMethod { receiver, method_name } => eval_bound_call(receiver, method_name, arg_nodes, env, print),
        other => eval_plain_call(other, arg_nodes, env, print),
    }
}

fn eval_bound_call<P: PrintWriter>(
    receiver: &Node,
    method_name: &str,
    arg_nodes: &[Node],
    env: &EnvRef,
    print: &mut P,
) -> EvalResult<Value> {
    let receiver_val = eval_node(receiver, env, print)?;
    let args = eval_args(arg_nodes, env, print)?;
    match &receiver_val {
        Value::Instance(inst_rc) => {
            let class_rc = inst_rc.borrow().class.clone();
            let method = class_rc.borrow().methods.get(method_name).cloned();
            let Some(lambda) = method else {
                let class_name = class_rc.borrow().name.clone();
                return Err(Flow::from(VesperError::Name(format!(
                    "no method '{method_name}' on instance of '{class_name}'"
                ))));
            };
            inst_rc.borrow_mut().current_class_view = class_rc;
            call_lambda_with_self(&lambda, &args, receiver_val.clone(), env, print, None)
        }
        Value::Class(cls_rc) => {
            let class_method = cls_rc.borrow().class_methods.get(method_name).cloned();
            if let Some(lambda) = class_method {
                return call_lambda_plain(&lambda, &args, env, print);
            }
            let class_name = cls_rc.borrow().name.clone();
            if cls_rc.borrow().methods.contains_key(method_name) {
                Err(Flow::from(VesperError::Type(format!(
                    "'{method_name}' is an instance method, not a class method, on class '{class_name}'"
                ))))
            } else {
                Err(Flow::from(VesperError::Name(format!(
                    "no class method '{method_name}' on class '{class_name}'"
                ))))
            }
        }
        Value::Str(s) => eval_string_builtin(s, method_name, &args),
        Value::List(l) => eval_list_builtin(l, method_name, &args),
        other => Err(Flow::from(VesperError::Type(format!(
            "cannot call method '{method_name}' on a {}",
            other.type_name()
        )))),
    }
}

fn eval_plain_call<P: PrintWriter>(lhs: &Node, arg_nodes: &[Node], env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    let callee = eval_node(lhs, env, print)?;
    let args = eval_args(arg_nodes, env, print)?;
    match callee {
        Value::Lambda(lambda) => call_lambda_registered(&lambda, &args, env, print),
        Value::Class(cls) => instantiate_class(&cls, &args, env, print),
        other => Err(Flow::from(VesperError::Type(format!("cannot invoke a {}", other.type_name())))),
    }
}

fn bind_args(scope: &EnvRef, lambda: &LambdaDef, args: &[Value]) -> Result<(), VesperError> {
    if lambda.is_varargs {
        let fixed = lambda.arg_names.len().saturating_sub(1);
        if args.len() < fixed {
            return Err(VesperError::Arity(format!(
                "'{}' expects at least {fixed} argument(s), got {}",
                lambda.id,
                args.len()
            )));
        }
        for (name, val) in lambda.arg_names[..fixed].iter().zip(args.iter()) {
            Environment::declare_var(scope, name, val.clone())?;
        }
        let rest = args[fixed..].to_vec();
        Environment::declare_var(scope, &lambda.arg_names[fixed], Value::new_list(rest))?;
    } else {
        if args.len() != lambda.arg_names.len() {
            return Err(VesperError::Arity(format!(
                "'{}' expects {} argument(s), got {}",
                lambda.id,
                lambda.arg_names.len(),
                args.len()
            )));
        }
        for (name, val) in lambda.arg_names.iter().zip(args.iter()) {
            Environment::declare_var(scope, name, val.clone())?;
        }
    }
    Ok(())
}

fn run_body<P: PrintWriter>(scope: &EnvRef, body: &Node, print: &mut P) -> EvalResult<Value> {
    let result = match body {
        Node::Block(stmts) => eval_stmts_in_scope(stmts, scope, print),
        other => eval_node(other, scope, print),
    };
    match result {
        Ok(v) => Ok(v),
        Err(Flow::Return(v)) => Ok(v),
        Err(Flow::Break) | Err(Flow::Continue) => Err(Flow::from(VesperError::Internal(
            "'break'/'continue' escaped a function body".into(),
        ))),
        Err(other) => Err(other),
    }
}

/// Calls a lambda/method with `self` bound as a constant; used for instance
/// methods, `init`, and `super(...)`.
fn call_lambda_with_self<P: PrintWriter>(
    lambda: &Rc<LambdaDef>,
    args: &[Value],
    self_value: Value,
    env: &EnvRef,
    print: &mut P,
    extra_const: Option<(String, Value)>,
) -> EvalResult<Value> {
    let global = Environment::global(env);
    let scope = Environment::new_detached(&global);
    Environment::declare_const(&scope, "self", self_value)?;
    if let Some((name, value)) = extra_const {
        Environment::declare_const(&scope, &name, value)?;
    }
    bind_args(&scope, lambda, args)?;
    run_body(&scope, &lambda.body, print)
}

/// Calls a class method — no `self` binding.
fn call_lambda_plain<P: PrintWriter>(lambda: &Rc<LambdaDef>, args: &[Value], env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    let global = Environment::global(env);
    let scope = Environment::new_detached(&global);
    bind_args(&scope, lambda, args)?;
    run_body(&scope, &lambda.body, print)
}

/// Calls a plain (unbound) lambda value, registering it under its own `id`
/// so recursive self-reference by name works.
fn call_lambda_registered<P: PrintWriter>(lambda: &Rc<LambdaDef>, args: &[Value], env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    let global = Environment::global(env);
    let scope = Environment::new_detached(&global);
    Environment::declare_const(&scope, &lambda.id, Value::Lambda(lambda.clone()))?;
    bind_args(&scope, lambda, args)?;
    run_body(&scope, &lambda.body, print)
}

fn instantiate_class<P: PrintWriter>(
    cls_rc: &Rc<RefCell<ClassObj>>,
    args: &[Value],
    env: &EnvRef,
    print: &mut P,
) -> EvalResult<Value> {
    let instance = Rc::new(RefCell::new(InstanceObj {
        class: cls_rc.clone(),
        fields: HashMap::new(),
        current_class_view: cls_rc.clone(),
    }));
    let instance_val = Value::Instance(instance);
    let init = cls_rc.borrow().methods.get("init").cloned();
    if let Some(init_lambda) = init {
        let class_name = cls_rc.borrow().name.clone();
        let result = call_lambda_with_self(
            &init_lambda,
            args,
            instance_val.clone(),
            env,
            print,
            Some((class_name, Value::Class(cls_rc.clone()))),
        )?;
        if !matches!(result, Value::Nil) {
            return Err(Flow::from(VesperError::Type("'init' must not return a value".into())));
        }
    }
    Ok(instance_val)
}

/// `super(...)`: invokes the initializer stashed under
/// `<SUPER>` on the instance's current class view, then ratchets that view
/// one level further up so a nested `super()` inside that body resolves to
/// the next ancestor rather than looping back to the same level.
fn eval_super_call<P: PrintWriter>(arg_nodes: &[Node], env: &EnvRef, print: &mut P) -> EvalResult<Value> {
    let self_val =
        Environment::get(env, "self").map_err(|_| VesperError::Inheritance("'super' used outside an init body".into()))?;
    let Value::Instance(inst_rc) = &self_val else {
        return Err(Flow::from(VesperError::Inheritance("'super' used outside an init body".into())));
    };
    let args = eval_args(arg_nodes, env, print)?;
    let view = inst_rc.borrow().current_class_view.clone();
    let super_init = view
        .borrow()
        .methods
        .get(SUPER_INIT)
        .cloned()
        .ok_or_else(|| VesperError::Inheritance("no superclass initializer reachable via 'super'".into()))?;
    let superclass = view
        .borrow()
        .superclass
        .clone()
        .ok_or_else(|| VesperError::Inheritance("class has no superclass".into()))?;
    inst_rc.borrow_mut().current_class_view = superclass;
    call_lambda_with_self(&super_init, &args, self_val.clone(), env, print, None)
}

/// `ClassDecl` evaluation: copy-then-override. The superclass's own methods
/// are copied in wholesale except any already-stashed `<SUPER>` entry; its
/// own `init` (if any) is additionally stashed under `<SUPER>` so this
/// class's `super(...)` can reach exactly one level up. Class methods are
/// inherited the same way, so `B.make()`-style class methods keep working
/// after subclassing.
fn eval_class_decl(def: &ClassDeclDef, env: &EnvRef) -> EvalResult<Value> {
    let superclass = match &def.superclass {
        Some(name) => {
            let val = Environment::get_const(env, name)
                .map_err(|_| VesperError::Inheritance(format!("superclass '{name}' is not declared as a constant")))?;
            let Value::Class(c) = val else {
                return Err(Flow::from(VesperError::Inheritance(format!("'{name}' is not a class"))));
            };
            Some(c)
        }
        None => None,
    };

    let mut methods = HashMap::new();
    let mut class_methods = HashMap::new();
    if let Some(super_rc) = &superclass {
        let super_ref = super_rc.borrow();
        for (name, lambda) in &super_ref.methods {
            if name == SUPER_INIT {
                continue;
            }
            methods.insert(name.clone(), lambda.clone());
        }
        if let Some(super_init) = super_ref.methods.get("init") {
            methods.insert(SUPER_INIT.to_string(), super_init.clone());
        }
        for (name, lambda) in &super_ref.class_methods {
            class_methods.insert(name.clone(), lambda.clone());
        }
    }
    for m in &def.methods {
        methods.insert(m.name.clone(), m.lambda.clone());
    }
    for m in &def.class_methods {
        class_methods.insert(m.name.clone(), m.lambda.clone());
    }

    let class_obj = Rc::new(RefCell::new(ClassObj {
        name: def.name.clone(),
        superclass,
        methods,
        class_methods,
    }));
    let class_val = Value::Class(class_obj);
    Environment::declare_const(env, &def.name, class_val.clone())?;
    Ok(class_val)
}

fn eval_list_builtin(list_rc: &Rc<RefCell<Vec<Value>>>, method: &str, args: &[Value]) -> EvalResult<Value> {
    match method {
        "add" => {
            if args.len() != 1 {
                return Err(arity_err("add", "1", args.len()));
            }
            list_rc.borrow_mut().push(args[0].clone());
            Ok(Value::Nil)
        }
        "insert" => {
            if args.len() != 2 {
                return Err(arity_err("insert", "2", args.len()));
            }
            let Value::Number(i) = args[0] else {
                return Err(Flow::from(VesperError::Type("'insert' index must be a number".into())));
            };
            let mut list = list_rc.borrow_mut();
            let idx = i as i64;
            if idx < 0 || idx as usize > list.len() {
                return Err(Flow::from(VesperError::Index(format!(
                    "insert index {idx} out of range for list of length {}",
                    list.len()
                ))));
            }
            list.insert(idx as usize, args[1].clone());
            Ok(Value::Nil)
        }
        "find" => {
            if args.len() != 1 {
                return Err(arity_err("find", "1", args.len()));
            }
            let list = list_rc.borrow();
            let pos = list.iter().position(|v| v.values_equal(&args[0]));
            Ok(Value::Number(pos.map_or(-1.0, |p| p as f32)))
        }
        "remove" => {
            if args.len() != 1 {
                return Err(arity_err("remove", "1", args.len()));
            }
            let Value::Number(i) = args[0] else {
                return Err(Flow::from(VesperError::Type("'remove' index must be a number".into())));
            };
            let mut list = list_rc.borrow_mut();
            let idx = i as i64;
            if idx < 0 || idx as usize >= list.len() {
                return Err(Flow::from(VesperError::Index(format!(
                    "remove index {idx} out of range for list of length {}",
                    list.len()
                ))));
            }
            list.remove(idx as usize);
            Ok(Value::Nil)
        }
        other => Err(Flow::from(VesperError::Name(format!("list has no method '{other}'")))),
    }
}

fn eval_string_builtin(str_rc: &Rc<RefCell<String>>, method: &str, args: &[Value]) -> EvalResult<Value> {
    match method {
        "concat" => {
            let mut buf = str_rc.borrow_mut();
            for a in args {
                buf.push_str(&a.display_string());
            }
            Ok(Value::Nil)
        }
        other => Err(Flow::from(VesperError::Name(format!("string has no method '{other}'")))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CollectStringPrint;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn run(src: &str) -> (String, Value) {
        let nodes = parse(tokenize(src)).unwrap_or_else(|e| panic!("parse error: {e}"));
        let global = Environment::new_global();
        let mut sink = CollectStringPrint::new();
        let mut last = Value::Nil;
        for node in &nodes {
            last = eval_node(node, &global, &mut sink).unwrap_or_else(|e| panic!("eval error: {e:?}"));
        }
        (sink.into_string(), last)
    }

    fn run_failing(src: &str) -> Flow {
        let nodes = parse(tokenize(src)).unwrap_or_else(|e| panic!("parse error: {e}"));
        let global = Environment::new_global();
        let mut sink = CollectStringPrint::new();
        for node in &nodes {
            if let Err(flow) = eval_node(node, &global, &mut sink) {
                return flow;
            }
        }
        panic!("expected a runtime error, program ran to completion");
    }

    #[test]
    fn scenario_arithmetic_precedence() {
        let (out, _) = run("print 1 + 2 * 3\n");
        assert_eq!(out, "7");
    }

    #[test]
    fn scenario_recursive_factorial() {
        let (out, _) = run("fn fact(n)\n    if n == 0\n        return 1\n    return n * fact(n - 1)\nprint fact(5)\n");
        assert_eq!(out, "120");
    }

    #[test]
    fn scenario_list_mutation_via_for() {
        let (out, _) = run("var xs = [1, 2, 3]\nfor x in xs\n    x = x * 2\nprint xs\n");
        assert_eq!(out, "[2, 4, 6]");
    }

    #[test]
    fn scenario_class_init_and_self() {
        let (out, _) = run("class A\n    fn init(x)\n        self.x = x\n    fn get()\n        return self.x\nvar a = A(7)\nprint a.get()\n");
        assert_eq!(out, "7");
    }

    #[test]
    fn scenario_single_inheritance_with_super() {
        let (out, _) = run(
            "class A\n    fn init(x)\n        self.x = x\nclass B(A)\n    fn init(x, y)\n        super(x)\n        self.y = y\n    fn sum()\n        return self.x + self.y\nvar b = B(3, 4)\nprint b.sum()\n",
        );
        assert_eq!(out, "7");
    }

    #[test]
    fn scenario_string_concat_aliasing() {
        let (out, _) = run("var s = \"abc\"\ns.concat(\"de\", \"f\")\nprint s\n");
        assert_eq!(out, "abcdef");
    }

    #[test]
    fn three_level_super_chain_resolves_each_ancestor() {
        let (out, _) = run(concat!(
            "class A\n    fn init(x)\n        self.x = x\n",
            "class B(A)\n    fn init(x, y)\n        super(x)\n        self.y = y\n",
            "class C(B)\n    fn init(x, y, z)\n        super(x, y)\n        self.z = z\n    fn sum()\n        return self.x + self.y + self.z\n",
            "var c = C(1, 2, 3)\nprint c.sum()\n",
        ));
        assert_eq!(out, "6");
    }

    #[test]
    fn equality_is_reflexive_and_symmetric() {
        let (_, a) = run("1 + 1\n");
        let (_, b) = run("2\n");
        assert!(a.values_equal(&a));
        assert!(a.values_equal(&b));
        assert!(b.values_equal(&a));
    }

    #[test]
    fn or_short_circuits_and_skips_rhs_side_effect() {
        let (out, _) = run("var hit = false\nfn mark()\n    hit = true\n    return true\ntrue or mark()\nprint hit\n");
        assert_eq!(out, "false");
    }

    #[test]
    fn and_short_circuits_and_skips_rhs_side_effect() {
        let (out, _) = run("var hit = false\nfn mark()\n    hit = true\n    return true\nfalse and mark()\nprint hit\n");
        assert_eq!(out, "false");
    }

    #[test]
    fn inclusive_range_over_numbers_counts_floor_diff_plus_one() {
        let (out, _) = run("var n = 0\nfor i in 1..=5\n    n = n + 1\nprint n\n");
        assert_eq!(out, "5");
    }

    #[test]
    fn varargs_with_zero_extra_args_binds_empty_list() {
        let (out, _) = run("fn f(a, *rest)\n    return rest\nprint f(1)\n");
        assert_eq!(out, "[]");
    }

    #[test]
    fn empty_block_evaluates_to_nil() {
        let (_, v) = run("if true\n    nil\n");
        assert!(matches!(v, Value::Nil));
    }

    #[test]
    fn empty_list_literal_has_length_zero() {
        let (out, _) = run("var xs = []\nprint xs.length\n");
        assert_eq!(out, "0");
    }

    #[test]
    fn subscript_at_length_is_an_index_error() {
        let flow = run_failing("var xs = [1, 2]\nprint xs[2]\n");
        assert!(matches!(flow, Flow::Error(VesperError::Index(_))));
    }

    #[test]
    fn list_find_add_remove_builtins() {
        let (out, _) = run("var xs = [1, 2, 3]\nxs.add(4)\nxs.remove(0)\nprint xs\nprint xs.find(3)\n");
        assert_eq!(out, "[2, 3, 4]\n1");
    }

    #[test]
    fn for_over_list_survives_the_body_shrinking_it() {
        let (out, _) = run("var xs = [1, 2, 3]\nfor x in xs\n    xs.remove(0)\nprint xs\n");
        assert_eq!(out, "[3]");
    }

    #[test]
    fn class_method_call_without_self() {
        let (out, _) = run("class A\n    fn class.make()\n        return 9\nprint A.make()\n");
        assert_eq!(out, "9");
    }

    #[test]
    fn calling_instance_method_name_from_class_is_an_error() {
        let flow = run_failing("class A\n    fn get()\n        return 1\nprint A.get()\n");
        assert!(matches!(flow, Flow::Error(VesperError::Type(_))));
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let flow = run_failing("fn f(a, b)\n    return a\nprint f(1)\n");
        assert!(matches!(flow, Flow::Error(VesperError::Arity(_))));
    }

    #[test]
    fn division_follows_ieee754_for_zero_divisor() {
        let (out, _) = run("print 1 / 0\n");
        assert_eq!(out, "inf");
    }

    #[test]
    fn for_over_string_rebuilds_the_buffer_from_mutated_chars() {
        let (out, _) = run("var s = \"abc\"\nfor c in s\n    c = 'x'\nprint s\n");
        assert_eq!(out, "xxx");
    }
}
