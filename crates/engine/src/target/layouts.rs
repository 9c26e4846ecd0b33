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

//! Built-in struct layouts for a stock MicroPython build.
//!
//! A real host reads these from debug info. Snapshots may omit any of them and
//! fall back to this table, which follows the upstream headers (`mpstate.h`,
//! `qstr.h`, `obj.h`, `bc.h`) with every optional feature that changes a
//! struct shape turned off.

use super::{FieldKind, FieldLayout, StructLayout};

/// Scheduler queue depth assumed by the built-in `mp_state_vm_t`.
pub const SCHED_QUEUE_DEPTH: u64 = 4;

/// Layout of `type_name` for a build with `word_size`-byte pointers.
pub fn standard_layout(type_name: &str, word_size: usize) -> Option<StructLayout> {
    let w = word_size as u64;
    let ptr = |name: &str, slot: u64| FieldLayout::pointer(name, slot * w, word_size);
    let word = |name: &str, slot: u64| FieldLayout::scalar(name, slot * w, w);
    let nested = |name: &str, slot: u64, words: u64, ty: &str| {
        FieldLayout::structure(name, slot * w, words * w, ty)
    };
    let flex = |name: &str, slot: u64| {
        FieldLayout::new(name, slot * w, 0, FieldKind::pointer_array(word_size, 0))
    };

    let (size_words, fields) = match type_name {
        "mp_obj_base_t" => (1, vec![ptr("type", 0)]),
        "mp_state_mem_area_t" => (
            6,
            vec![
                ptr("gc_alloc_table_start", 0),
                word("gc_alloc_table_byte_len", 1),
                ptr("gc_finaliser_table_start", 2),
                ptr("gc_pool_start", 3),
                ptr("gc_pool_end", 4),
                ptr("next", 5),
            ],
        ),
        "mp_state_mem_t" => (
            10,
            vec![
                nested("area", 0, 6, "mp_state_mem_area_t"),
                word("gc_lock_depth", 6),
                word("total_bytes_allocated", 7),
                word("current_bytes_allocated", 8),
                word("peak_bytes_allocated", 9),
            ],
        ),
        "mp_state_thread_t" => (
            7,
            vec![
                ptr("stack_top", 0),
                ptr("dict_locals", 1),
                ptr("dict_globals", 2),
                ptr("nlr_top", 3),
                ptr("nlr_jump_callback_top", 4),
                ptr("mp_pending_exception", 5),
                ptr("stop_iteration_arg", 6),
            ],
        ),
        "mp_sched_item_t" => (2, vec![ptr("func", 0), ptr("arg", 1)]),
        "mp_state_vm_t" => (
            17,
            vec![
                ptr("last_pool", 0),
                nested("mp_loaded_modules_dict", 1, 4, "mp_obj_dict_t"),
                nested("dict_main", 5, 4, "mp_obj_dict_t"),
                FieldLayout::new(
                    "sched_queue",
                    9 * w,
                    SCHED_QUEUE_DEPTH * 2 * w,
                    FieldKind::Array {
                        element: Box::new(FieldKind::structure("mp_sched_item_t")),
                        element_size: 2 * w,
                        len: SCHED_QUEUE_DEPTH,
                    },
                ),
            ],
        ),
        "mp_state_ctx_t" => (
            34,
            vec![
                nested("thread", 0, 7, "mp_state_thread_t"),
                nested("vm", 7, 17, "mp_state_vm_t"),
                nested("mem", 24, 10, "mp_state_mem_t"),
            ],
        ),
        "qstr_pool_t" => (
            6,
            vec![
                ptr("prev", 0),
                word("total_prev_len", 1).with_bits(0, (w * 8 - 1) as u32),
                word("is_sorted", 1).with_bits((w * 8 - 1) as u32, 1),
                word("alloc", 2),
                word("len", 3),
                ptr("hashes", 4),
                ptr("lengths", 5),
                flex("qstrs", 6),
            ],
        ),
        "mp_obj_type_t" => (
            2,
            vec![
                nested("base", 0, 1, "mp_obj_base_t"),
                FieldLayout::scalar("flags", w, 2),
                FieldLayout::scalar("name", w + 2, 2),
            ],
        ),
        "mp_map_t" => (
            3,
            vec![
                word("all_keys_are_qstrs", 0).with_bits(0, 1),
                word("is_fixed", 0).with_bits(1, 1),
                word("is_ordered", 0).with_bits(2, 1),
                word("used", 0).with_bits(3, (w * 8 - 3) as u32),
                word("alloc", 1),
                ptr("table", 2),
            ],
        ),
        "mp_map_elem_t" => (2, vec![ptr("key", 0), ptr("value", 1)]),
        "mp_obj_dict_t" => {
            (4, vec![nested("base", 0, 1, "mp_obj_base_t"), nested("map", 1, 3, "mp_map_t")])
        }
        "mp_obj_module_t" => {
            (2, vec![nested("base", 0, 1, "mp_obj_base_t"), ptr("globals", 1)])
        }
        "mp_module_constants_t" => (2, vec![ptr("qstr_table", 0), ptr("obj_table", 1)]),
        "mp_module_context_t" => (
            4,
            vec![
                nested("module", 0, 2, "mp_obj_module_t"),
                nested("constants", 2, 2, "mp_module_constants_t"),
            ],
        ),
        "mp_obj_fun_bc_t" => (
            4,
            vec![
                nested("base", 0, 1, "mp_obj_base_t"),
                ptr("context", 1),
                ptr("child_table", 2),
                ptr("bytecode", 3),
                flex("extra_args", 4),
            ],
        ),
        "mp_code_state_t" => (
            5,
            vec![
                ptr("fun_bc", 0),
                ptr("ip", 1),
                ptr("sp", 2),
                FieldLayout::scalar("n_state", 3 * w, 2),
                FieldLayout::scalar("exc_sp_idx", 3 * w + 2, 2),
                ptr("old_globals", 4),
                flex("state", 5),
            ],
        ),
        "mp_obj_list_t" => (
            4,
            vec![nested("base", 0, 1, "mp_obj_base_t"), word("alloc", 1), word("len", 2), ptr("items", 3)],
        ),
        "mp_obj_tuple_t" => {
            (2, vec![nested("base", 0, 1, "mp_obj_base_t"), word("len", 1), flex("items", 2)])
        }
        "mp_obj_str_t" => (
            4,
            vec![nested("base", 0, 1, "mp_obj_base_t"), word("hash", 1), word("len", 2), ptr("data", 3)],
        ),
        "mp_obj_float_t" => {
            (2, vec![nested("base", 0, 1, "mp_obj_base_t"), FieldLayout::scalar("value", w, 8)])
        }
        "mp_thread_t" => (
            4,
            vec![word("id", 0), word("ready", 1), ptr("arg", 2), ptr("next", 3)],
        ),
        _ => return None,
    };

    Some(StructLayout { name: type_name.to_string(), size: size_words * w, fields })
}
