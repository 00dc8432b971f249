use std::io::{self, Write};

use lox_vm::VM;

/// One VM lives for the whole session, so globals defined on one line are
/// visible on later ones. Compile and runtime errors are reported and the
/// loop continues.
pub fn start() {
    // Try rustyline; fallback to stdio
    let mut rl: Option<rustyline::DefaultEditor> = rustyline::DefaultEditor::new().ok();
    let mut vm = VM::new();

    loop {
        let line = if let Some(editor) = rl.as_mut() {
            match editor.readline("> ") {
                Ok(l) => {
                    if !l.trim().is_empty() {
                        let _ = editor.add_history_entry(l.as_str());
                    }
                    l
                }
                Err(_) => break,
            }
        } else {
            print!("> ");
            let _ = io::stdout().flush();
            let mut l = String::new();
            match io::stdin().read_line(&mut l) {
                Ok(0) | Err(_) => break,
                Ok(_) => l,
            }
        };

        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(function) = lox_compiler::compile(line) {
            let _ = vm.run(function);
        }
    }
}
