// MPDB - MicroPython Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! `state`, `obj`, `dis` and `qstr`

use std::io::Write;

use eyre::{Result, WrapErr};
use mpdb_engine::{
    bytecode::BytecodeFunction, evaluate, frames::current_code_state, InspectContext, QstrTable,
    TaggedValue, Target,
};

/// Print every value-stack slot of the innermost interpreted frame.
pub fn print_state<T: Target>(ctx: &InspectContext<T>, out: &mut impl Write) -> Result<()> {
    let code_state = current_code_state(ctx).wrap_err("No interpreted frame on the stack")?;
    let slots = code_state.slots(ctx)?;
    tracing::debug!(code_state = %format!("{:#x}", code_state.address), slots = slots.len(), "Printing state");
    for (index, word) in slots.into_iter().enumerate() {
        writeln!(out, "{index:>3}: {}", ctx.format_value(word))?;
    }
    Ok(())
}

/// Decode and print the value of `expr`.
pub fn print_object<T: Target>(ctx: &InspectContext<T>, expr: &str, out: &mut impl Write) -> Result<()> {
    let word = evaluate(ctx, expr).wrap_err_with(|| format!("Cannot evaluate {expr:?}"))?;
    writeln!(out, "{}", ctx.format_value(word))?;
    Ok(())
}

/// Disassemble the bytecode function `expr` refers to.
pub fn disassemble<T: Target>(ctx: &InspectContext<T>, expr: &str, out: &mut impl Write) -> Result<()> {
    let word = evaluate(ctx, expr).wrap_err_with(|| format!("Cannot evaluate {expr:?}"))?;
    let address = match ctx.classify(word) {
        TaggedValue::HeapPointer(address) => address,
        other => eyre::bail!("{expr} is {other:?}, not a function object"),
    };

    // Without mp_type_fun_bc in the build there is nothing to check against.
    if ctx.type_address("fun_bc").is_some() {
        let type_ptr = ctx.object_type(address)?;
        if !ctx.is_type(type_ptr, "fun_bc") {
            let name = ctx.type_name(type_ptr).unwrap_or_else(|| "?".to_string());
            eyre::bail!("{expr} is a {name} object, not a bytecode function");
        }
    }

    let function = BytecodeFunction::read(ctx, address)?;
    write!(out, "{}", function.listing(ctx))?;
    Ok(())
}

/// Print the text of qstr `id`.
pub fn print_qstr<T: Target>(ctx: &InspectContext<T>, id: u64, out: &mut impl Write) -> Result<()> {
    let resolved = QstrTable::new(ctx).lookup(id)?;
    tracing::debug!(id, hops = resolved.hops, pool = %format!("{:#x}", resolved.pool), "Resolved qstr");
    writeln!(out, "{}", resolved.text)?;
    Ok(())
}
